//! The capability set shared by every record source: in-memory cursors, spill readers,
//! chained readers, and the k-way merger's output. Modeled as one trait object
//! (`dyn RecordSource`) rather than a hierarchy of iterator adapters.
use std::cmp::Ordering;

use crate::result::Result;

/// Caller-supplied tiebreaker compare over two record payloads, used when two entries
/// share a prefix. Boxed so the sorter can be constructed without a generic parameter
/// threading through every component.
pub type RecordCompare = Box<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// One record as seen by a [`RecordSource`]: a borrowed payload slice plus its prefix,
/// since in this crate a record's bytes are always contiguous and self-describing.
#[derive(Clone, Copy)]
pub struct CurrentRecord<'a> {
    pub bytes: &'a [u8],
    pub prefix: u64,
}

/// Common contract satisfied by the in-memory sorted cursor, a spill reader, a chained
/// reader, and the k-way merger's output.
pub trait RecordSource {
    /// True while a record remains to be loaded.
    fn has_next(&self) -> bool;

    /// Advance to the next record. Must be called before the first [`Self::current`].
    fn load_next(&mut self) -> Result<()>;

    /// The record most recently loaded by `load_next`. Panics if `load_next` was never
    /// called or has already exhausted the source.
    fn current(&self) -> CurrentRecord<'_>;

    /// Total record count this source was constructed with (not "remaining").
    fn num_records(&self) -> usize;
}
