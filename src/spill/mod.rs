//! Spill-run registry and the file-backed spill writer/reader.
pub mod file;

use crate::record::RecordSource;
use crate::result::Result;

/// A closed, immutable spill run. Readers may be opened at most once per run during
/// output.
pub trait SpillRun: Send + Sync {
    fn reader(&self) -> Result<Box<dyn RecordSource + Send>>;
    fn remove_file(&self) -> Result<()>;
    fn num_records(&self) -> usize;
}

/// An open spill writer: accepts records in sorted order, then closes into an
/// immutable [`SpillRun`].
pub trait SpillWriter: Send {
    fn write(&mut self, prefix: u64, bytes: &[u8]) -> Result<()>;
    fn close(self: Box<Self>) -> Result<Box<dyn SpillRun>>;
}

/// Ordered container of closed spill runs. Order matches creation order; the registry
/// never drops entries except via [`SpillRegistry::cleanup`].
#[derive(Default)]
pub struct SpillRegistry {
    runs: Vec<Box<dyn SpillRun>>,
}

impl SpillRegistry {
    pub fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn push(&mut self, run: Box<dyn SpillRun>) {
        self.runs.push(run);
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn SpillRun> {
        self.runs.iter().map(|r| r.as_ref())
    }

    /// Move every run out, leaving the registry empty. Used by `merge` to transfer
    /// another sorter's runs into this one without reopening them.
    pub fn drain(&mut self) -> impl Iterator<Item = Box<dyn SpillRun>> + '_ {
        self.runs.drain(..)
    }

    /// Delete every spill file. Errors are logged, not propagated, so cleanup always
    /// completes.
    pub fn cleanup(&mut self) {
        for run in self.runs.drain(..) {
            if let Err(err) = run.remove_file() {
                log::warn!("failed to remove spill file during cleanup: {err}");
            }
        }
    }
}
