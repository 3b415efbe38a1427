use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use zerocopy::{FromBytes, IntoBytes};

use crate::layout::SpillRecordHeader;
use crate::record::{CurrentRecord, RecordSource};
use crate::result::Result;
use crate::spill::{SpillRun, SpillWriter};

/// Storage backend for spill runs, mirroring the teacher's `IFileSystem` /
/// `InMemoryFs` split so tests never touch the real filesystem.
pub trait SpillStorage: Send + Sync {
    fn create(&self, name: &str) -> Result<Box<dyn SpillHandle>>;
    fn open(&self, name: &str) -> Result<Box<dyn SpillHandle>>;
    fn remove(&self, name: &str) -> Result<()>;
}

pub trait SpillHandle: Read + Write + Seek + Send {}
impl<T: Read + Write + Seek + Send> SpillHandle for T {}

/// Spills to real files under a chosen directory (the process temp dir by default).
pub struct FsSpillStorage {
    dir: PathBuf,
}

impl FsSpillStorage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn temp_dir() -> Result<Self> {
        Self::new(std::env::temp_dir().join("spillsort"))
    }
}

impl SpillStorage for FsSpillStorage {
    fn create(&self, name: &str) -> Result<Box<dyn SpillHandle>> {
        let file = File::create(self.dir.join(name))?;
        Ok(Box::new(file))
    }

    fn open(&self, name: &str) -> Result<Box<dyn SpillHandle>> {
        let file = File::open(self.dir.join(name))?;
        Ok(Box::new(file))
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.dir.join(name))?;
        Ok(())
    }
}

/// In-memory storage for tests and embedders that would rather not touch a disk at
/// all.
#[derive(Default)]
pub struct InMemorySpillStorage {
    files: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
}

impl InMemorySpillStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SpillStorage for InMemorySpillStorage {
    fn create(&self, name: &str) -> Result<Box<dyn SpillHandle>> {
        let buf = Arc::new(Mutex::new(Vec::new()));
        self.files.lock().unwrap().insert(name.to_owned(), buf.clone());
        Ok(Box::new(InMemoryWriteHandle { buf }))
    }

    fn open(&self, name: &str) -> Result<Box<dyn SpillHandle>> {
        let buf = self
            .files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(Mutex::new(Vec::new())));
        let bytes = buf.lock().unwrap().clone();
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.files.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Write-only handle backing [`InMemorySpillStorage::create`]; bytes land directly in
/// the shared buffer so a subsequent `open` sees them.
struct InMemoryWriteHandle {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for InMemoryWriteHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for InMemoryWriteHandle {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(0)
    }
}

impl Seek for InMemoryWriteHandle {
    fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
        Ok(0)
    }
}

/// Writes records in the order received to a [`SpillStorage`]-backed handle, then
/// closes into a [`FileSpillRun`].
pub struct FileSpillWriter {
    storage: Arc<dyn SpillStorage>,
    name: String,
    handle: Box<dyn SpillHandle>,
    written: usize,
}

static SPILL_NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

impl FileSpillWriter {
    /// `expected_record_count` only sizes the run's bookkeeping; the writer itself does
    /// no buffering beyond the handle's own.
    pub fn new(storage: Arc<dyn SpillStorage>, _expected_record_count: usize) -> Result<Self> {
        let id = SPILL_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("run-{id}.spill");
        let handle = storage.create(&name)?;
        Ok(Self {
            storage,
            name,
            handle,
            written: 0,
        })
    }
}

impl SpillWriter for FileSpillWriter {
    fn write(&mut self, prefix: u64, bytes: &[u8]) -> Result<()> {
        let header = SpillRecordHeader::new(prefix, bytes.len() as u32);
        self.handle.write_all(header.as_bytes())?;
        self.handle.write_all(bytes)?;
        self.written += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<Box<dyn SpillRun>> {
        self.handle.flush()?;
        Ok(Box::new(FileSpillRun {
            storage: self.storage,
            name: self.name,
            num_records: self.written,
        }))
    }
}

pub struct FileSpillRun {
    storage: Arc<dyn SpillStorage>,
    name: String,
    num_records: usize,
}

impl SpillRun for FileSpillRun {
    fn reader(&self) -> Result<Box<dyn RecordSource + Send>> {
        let handle = self.storage.open(&self.name)?;
        Ok(Box::new(FileSpillReader {
            handle,
            remaining: self.num_records,
            total: self.num_records,
            current: None,
        }))
    }

    fn remove_file(&self) -> Result<()> {
        self.storage.remove(&self.name)
    }

    fn num_records(&self) -> usize {
        self.num_records
    }
}

pub struct FileSpillReader {
    handle: Box<dyn SpillHandle>,
    remaining: usize,
    total: usize,
    current: Option<(Vec<u8>, u64)>,
}

impl RecordSource for FileSpillReader {
    fn has_next(&self) -> bool {
        self.remaining > 0
    }

    fn load_next(&mut self) -> Result<()> {
        if self.remaining == 0 {
            return Ok(());
        }

        let mut header_bytes = [0u8; SpillRecordHeader::SIZE];
        self.handle.read_exact(&mut header_bytes)?;
        let header = SpillRecordHeader::ref_from_bytes(&header_bytes)
            .expect("spill record header must be well-formed");
        let prefix = header.prefix.get();
        let len = header.len.get() as usize;

        let mut bytes = vec![0u8; len];
        self.handle.read_exact(&mut bytes)?;

        self.current = Some((bytes, prefix));
        self.remaining -= 1;
        Ok(())
    }

    fn current(&self) -> CurrentRecord<'_> {
        let (bytes, prefix) = self
            .current
            .as_ref()
            .expect("load_next must be called before current");
        CurrentRecord { bytes, prefix: *prefix }
    }

    fn num_records(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_fs_storage() {
        let dir = std::env::temp_dir().join(format!("spillsort-test-{}", std::process::id()));
        let storage: Arc<dyn SpillStorage> = Arc::new(FsSpillStorage::new(dir.clone()).unwrap());

        let mut writer: Box<dyn SpillWriter> = Box::new(FileSpillWriter::new(storage.clone(), 3).unwrap());
        writer.write(3, b"alpha").unwrap();
        writer.write(1, b"beta").unwrap();
        let run = writer.close().unwrap();

        assert_eq!(run.num_records(), 2);

        let mut reader = run.reader().unwrap();
        let mut out = Vec::new();
        while reader.has_next() {
            reader.load_next().unwrap();
            let rec = reader.current();
            out.push((rec.prefix, rec.bytes.to_vec()));
        }
        assert_eq!(out, vec![(3, b"alpha".to_vec()), (1, b"beta".to_vec())]);

        run.remove_file().unwrap();
        let _ = fs::remove_dir(&dir);
    }

    #[test]
    fn write_then_read_round_trips_in_memory_storage() {
        let storage: Arc<dyn SpillStorage> = Arc::new(InMemorySpillStorage::new());
        let mut writer: Box<dyn SpillWriter> = Box::new(FileSpillWriter::new(storage.clone(), 2).unwrap());
        writer.write(10, b"x").unwrap();
        writer.write(5, b"yy").unwrap();
        let run = writer.close().unwrap();

        let mut reader = run.reader().unwrap();
        let mut out = Vec::new();
        while reader.has_next() {
            reader.load_next().unwrap();
            out.push(reader.current().prefix);
        }
        assert_eq!(out, vec![10, 5]);
        run.remove_file().unwrap();
    }
}
