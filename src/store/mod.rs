pub mod memory;
pub mod s3;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Boxed error carried by store backends
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stream of an object's bytes, in order
pub type BlobReader = BoxStream<'static, StoreResult<Bytes>>;

/// Errors raised by object store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {id}")]
    NotFound { id: String },

    #[error("{op} failed for {id}")]
    Request {
        op: &'static str,
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("I/O error on {id}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{id}: {reason}")]
    Rejected { id: String, reason: String },
}

impl StoreError {
    pub fn request<E>(op: &'static str, id: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Request {
            op,
            id: id.to_string(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    /// Length of the object in bytes
    pub length: u64,
    pub content_type: Option<String>,
}

/// Write half of an object being created in the store.
///
/// Nothing written is guaranteed to be durable until `close` returns. `abort`
/// releases the sink without committing; whatever the backend already made
/// visible is left for the caller to delete.
#[async_trait]
pub trait BlobSink: Send {
    /// Append a chunk to the object
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Commit everything written so far
    async fn close(&mut self) -> StoreResult<()>;

    /// Release the sink without committing
    async fn abort(&mut self) -> StoreResult<()>;
}

/// Object store operations the zip engine depends on
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object's properties
    async fn properties(&self, id: &str) -> StoreResult<BlobProperties>;

    /// Open an object for streaming reads
    async fn open_read(&self, id: &str) -> StoreResult<BlobReader>;

    /// Open a new object for writing, replacing any existing one
    async fn open_write(&self, id: &str, content_type: &str) -> StoreResult<Box<dyn BlobSink>>;

    /// Delete an object. Returns whether it existed.
    async fn delete_if_exists(&self, id: &str) -> StoreResult<bool>;
}
