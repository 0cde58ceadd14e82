//! The error kinds a caller can observe.

use datafile::DataFileError;
use index::IndexError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An empty key was passed to `put`, `get`, or `delete`.
    #[error("key is empty")]
    KeyIsEmpty,

    /// No live entry for the key.
    #[error("key not found in database")]
    KeyNotFound,

    /// The key directory references a data file that is not open —
    /// the directory and the disk disagree.
    #[error("data file not found")]
    DataFileNotFound,

    /// The data directory holds something that is not ours.
    #[error("the database directory may be corrupted")]
    DataDirectoryCorrupted,

    /// A write batch grew past `max_batch_num`.
    #[error("exceed the max batch num")]
    ExceedMaxBatchNum,

    /// Another merge is already running.
    #[error("merge is in progress, try again later")]
    MergeIsInProgress,

    /// Dead bytes have not yet reached the configured merge ratio.
    #[error("the merge ratio does not reach the option")]
    MergeRatioUnreached,

    /// The filesystem cannot hold a compacted copy of the live data.
    #[error("no enough disk space for merge")]
    NoEnoughSpaceForMerge,

    /// Another process holds the directory lock.
    #[error("the database directory is used by another process")]
    DatabaseIsUsing,

    /// A record failed its CRC check on read.
    #[error("invalid crc, log record may be corrupted")]
    InvalidCrc,

    /// An option failed validation at open.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// The key directory backend failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// An underlying IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DataFileError> for Error {
    fn from(e: DataFileError) -> Self {
        match e {
            DataFileError::Io(e) => Error::Io(e),
            DataFileError::InvalidCrc => Error::InvalidCrc,
            DataFileError::Corrupted(_) => Error::DataDirectoryCorrupted,
        }
    }
}
