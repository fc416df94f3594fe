pub mod zip;

pub use zip::{ArchiveSummary, ZipStreamWriter};

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised while writing an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("entry {name:?} is still open")]
    EntryAlreadyOpen { name: String },

    #[error("no entry is open")]
    NoOpenEntry,

    #[error("archive is already finished")]
    Finished,

    #[error("entry name is {len} bytes, longer than a zip header allows")]
    NameTooLong { len: usize },

    #[error("entry {name:?} declared {declared} bytes but {actual} were written")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("compression failed")]
    Compress(#[source] std::io::Error),

    #[error("failed to write archive bytes")]
    Sink(#[from] StoreError),
}
