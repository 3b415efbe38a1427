use std::{
    backtrace::Backtrace,
    error::Error as IError,
    fmt::{Debug, Display},
    io,
};

pub struct Error {
    pub backtrace: Backtrace,
    pub kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SorterError").field("kind", &self.kind).finish()
    }
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::capture(),
        }
    }

    pub fn contract(msg: &'static str) -> Self {
        Self::new(ErrorKind::ContractViolation(msg))
    }
}

impl IError for Error {
    fn source(&self) -> Option<&(dyn IError + 'static)> {
        if let ErrorKind::IoFailure(error) = &self.kind {
            return Some(error);
        }

        None
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::new(ErrorKind::IoFailure(value))
    }
}

#[derive(Debug)]
/// Error kinds surfaced by the sorter, its memory manager, and its spill I/O.
pub enum ErrorKind {
    /// Array or page allocation failed and no concurrent spill recovered the space.
    MemoryUnavailable,
    /// Spill write, spill read, or spill-file removal failed.
    IoFailure(io::Error),
    /// Record exceeds page size, or the caller broke a single-consumer contract
    /// (inserted after consuming an iterator, consumed both output iterators, ...).
    ContractViolation(&'static str),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::MemoryUnavailable => write!(f, "memory manager could not satisfy the allocation"),
            ErrorKind::IoFailure(_) => write!(f, "a spill i/o operation failed"),
            ErrorKind::ContractViolation(msg) => write!(f, "contract violation: {msg}"),
        }
    }
}
