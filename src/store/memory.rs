use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{BlobProperties, BlobReader, BlobSink, BlobStore, StoreError, StoreResult};

/// Default size of the chunks handed out by `open_read`
const DEFAULT_READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Default)]
struct StoredBlob {
    data: Vec<u8>,
    content_type: Option<String>,
}

/// In-memory object store.
///
/// An object becomes visible as soon as `open_write` is called and grows with
/// every write, the way a block blob opened for writing does. Useful for
/// tests and local dry runs.
#[derive(Clone)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredBlob>>>,
    read_chunk: usize,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        MemoryBlobStore {
            objects: Arc::new(RwLock::new(HashMap::new())),
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    /// Set the chunk size used when streaming objects out
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    /// Store an object directly
    pub fn insert(&self, id: impl Into<String>, data: impl Into<Vec<u8>>) {
        let blob = StoredBlob {
            data: data.into(),
            content_type: None,
        };
        self.write_lock().insert(id.into(), blob);
    }

    /// Get a copy of an object's contents
    pub fn get(&self, id: &str) -> Option<Bytes> {
        self.read_lock()
            .get(id)
            .map(|blob| Bytes::copy_from_slice(&blob.data))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_lock().contains_key(id)
    }

    /// Content type recorded when the object was opened for writing
    pub fn content_type(&self, id: &str) -> Option<String> {
        self.read_lock()
            .get(id)
            .and_then(|blob| blob.content_type.clone())
    }

    /// All object identifiers, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Identifiers under a prefix, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, StoredBlob>> {
        self.objects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, StoredBlob>> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn properties(&self, id: &str) -> StoreResult<BlobProperties> {
        self.read_lock()
            .get(id)
            .map(|blob| BlobProperties {
                length: blob.data.len() as u64,
                content_type: blob.content_type.clone(),
            })
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn open_read(&self, id: &str) -> StoreResult<BlobReader> {
        let data = self
            .get(id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;

        let chunk = self.read_chunk;
        let chunks: Vec<StoreResult<Bytes>> = (0..data.len())
            .step_by(chunk)
            .map(|start| Ok(data.slice(start..(start + chunk).min(data.len()))))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn open_write(&self, id: &str, content_type: &str) -> StoreResult<Box<dyn BlobSink>> {
        let blob = StoredBlob {
            data: Vec::new(),
            content_type: Some(content_type.to_string()),
        };
        self.write_lock().insert(id.to_string(), blob);

        Ok(Box::new(MemorySink {
            objects: Arc::clone(&self.objects),
            id: id.to_string(),
            done: false,
        }))
    }

    async fn delete_if_exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.write_lock().remove(id).is_some())
    }
}

/// Sink appending straight into the shared map
struct MemorySink {
    objects: Arc<RwLock<HashMap<String, StoredBlob>>>,
    id: String,
    done: bool,
}

impl MemorySink {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.done {
            return Err(StoreError::Rejected {
                id: self.id.clone(),
                reason: "sink is already closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.ensure_open()?;
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        match objects.get_mut(&self.id) {
            Some(blob) => {
                blob.data.extend_from_slice(&chunk);
                Ok(())
            }
            None => Err(StoreError::Rejected {
                id: self.id.clone(),
                reason: "object was deleted while being written".to_string(),
            }),
        }
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.done = true;
        Ok(())
    }

    async fn abort(&mut self) -> StoreResult<()> {
        self.done = true;
        Ok(())
    }
}
