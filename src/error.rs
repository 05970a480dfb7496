use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Job-wide error type. Every kind is terminal: the engine never retries
/// an operation, it cancels the job and rolls back.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad flag value or a pre-existing output directory.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A single record cannot fit even in an empty buffer.
    #[error(
        "record is too large to fit in memory - required: {required}b \
         but buffer memory can only hold {capacity}b"
    )]
    RecordTooLarge { required: usize, capacity: usize },

    /// Mapper emitted a line whose partition prefix is not a decimal number.
    #[error("bad partition key in mapper output: {0:?}")]
    BadPartitionKey(String),

    /// Mapper emitted a partition outside [0, reducers).
    #[error("partition key was {key} - needs to be in [0, {reducers})")]
    PartitionOutOfRange { key: u64, reducers: usize },

    /// Mapper or reducer command terminated unsuccessfully.
    #[error("worker.{worker_id}: command '{command}' failed: {status}")]
    ChildExit {
        worker_id: usize,
        command: String,
        status: String,
    },

    /// Mid-varint EOF or short read while scanning a spill file.
    #[error("corrupt spill file {path}: {reason}")]
    CorruptSpill { path: PathBuf, reason: String },

    #[error("received interrupt - aborting job")]
    Interrupted,
}

impl Error {
    /// True for errors a failing child process induces in its own pipe
    /// handlers. Used to prefer the child's exit status as the reported
    /// cause over the broken pipe it provoked.
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
