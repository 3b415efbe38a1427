//! On-page / on-disk record headers, read and written without manual byte-fiddling via
//! `zerocopy`. Little-endian regardless of host architecture.
use std::mem::size_of;

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub type LeU32 = U32<LittleEndian>;
pub type LeU64 = U64<LittleEndian>;

/// Header written before every record's body on a page: a 4-byte length. Shared by
/// both the plain-record and key/value layouts (for a key/value record the body is
/// itself `[key_len: LeU32][key][value]`).
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RecordLenHeader {
    pub len: LeU32,
}

impl RecordLenHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(len: u32) -> Self {
        Self { len: LeU32::new(len) }
    }
}

/// Header written before every record on a spill run: the prefix travels alongside the
/// body so a reader never needs to dereference a page.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SpillRecordHeader {
    pub prefix: LeU64,
    pub len: LeU32,
}

impl SpillRecordHeader {
    pub const SIZE: usize = size_of::<Self>();

    pub fn new(prefix: u64, len: u32) -> Self {
        Self {
            prefix: LeU64::new(prefix),
            len: LeU32::new(len),
        }
    }
}
