//! Zip aggregation engine.
//!
//! Streams a list of source objects, one at a time and in order, into a
//! single ZIP archive written back to the same store. A failed or cancelled
//! run aborts its sink and deletes whatever part of the archive reached the
//! store before the error is returned.

mod cleanup;
pub mod metrics;
pub mod naming;

pub use metrics::{MetricsSnapshot, ServiceMetrics};
pub use naming::{OutputId, entry_name};

use futures::TryStreamExt;
use humansize::{DECIMAL, format_size};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveError, ArchiveSummary, ZipStreamWriter};
use crate::config::Settings;
use crate::store::{BlobSink, BlobStore, StoreError};
use cleanup::CleanupGuard;

/// Deflate level used for every archive
pub const COMPRESSION_LEVEL: u32 = 6;

/// Content type set on generated archives
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Errors returned by a zip run
#[derive(Debug, Error)]
pub enum ZipError {
    #[error("source object not found: {path}")]
    SourceNotFound { path: String },

    #[error("failed to read source object {path}")]
    SourceRead {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write archive {target}")]
    Write {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to build archive {target}")]
    Archive {
        target: String,
        #[source]
        source: ArchiveError,
    },

    #[error("zip operation was cancelled")]
    Cancelled,
}

/// Coarse classification of a `ZipError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceNotFound,
    SourceRead,
    Write,
    Cancelled,
}

impl ZipError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ZipError::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            ZipError::SourceRead { .. } => ErrorKind::SourceRead,
            ZipError::Write { .. } | ZipError::Archive { .. } => ErrorKind::Write,
            ZipError::Cancelled => ErrorKind::Cancelled,
        }
    }

    fn read_failure(path: &str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ZipError::SourceNotFound {
                path: path.to_string(),
            },
            source => ZipError::SourceRead {
                path: path.to_string(),
                source,
            },
        }
    }

    fn write_failure(target: &str, source: StoreError) -> Self {
        ZipError::Write {
            target: target.to_string(),
            source,
        }
    }

    fn archive_failure(target: &str, source: ArchiveError) -> Self {
        ZipError::Archive {
            target: target.to_string(),
            source,
        }
    }
}

/// Run `fut` unless `cancel` fires first
async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ZipError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ZipError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Builds zip archives from objects in a store
pub struct ZipService {
    store: Arc<dyn BlobStore>,
    output_prefix: String,
    cleanup_timeout: Duration,
    metrics: ServiceMetrics,
}

impl ZipService {
    pub fn new(store: Arc<dyn BlobStore>, settings: &Settings) -> Self {
        ZipService {
            store,
            output_prefix: settings.output_prefix.clone(),
            cleanup_timeout: settings.cleanup_timeout(),
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Zip `paths` into a new archive and return its identifier.
    ///
    /// Entries are written in input order and named after the final segment
    /// of each path. On failure the partial archive is removed (best effort)
    /// and the original error is returned, or `Cancelled` if `cancel` fired.
    pub async fn zip_files<S>(&self, paths: &[S], cancel: &CancellationToken) -> Result<OutputId, ZipError>
    where
        S: AsRef<str> + Sync,
    {
        let output = OutputId::generate(&self.output_prefix);
        let started = Instant::now();

        info!(
            archive = %output,
            files = paths.len(),
            "using level {COMPRESSION_LEVEL} compression"
        );

        // Stays armed until the run has settled, cleanup included
        let mut guard = CleanupGuard::arm(Arc::clone(&self.store), output.as_str(), self.cleanup_timeout);
        let result = self.write_archive(output.as_str(), paths, cancel).await;

        match result {
            Ok(summary) => {
                guard.disarm();
                self.metrics.record_success(&summary);
                info!(
                    archive = %output,
                    entries = summary.entries,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "created zip [{output}] with {} of {} data in {} bytes",
                    summary.entries,
                    format_size(summary.uncompressed_bytes, DECIMAL),
                    summary.archive_bytes,
                );
                Ok(output)
            }
            Err(err) => {
                self.metrics.record_failure();
                warn!(
                    archive = %output,
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "zip failed, cleaning up"
                );

                let removed = cleanup::discard(self.store.as_ref(), output.as_str(), self.cleanup_timeout).await;
                guard.disarm();
                if !removed {
                    self.metrics.record_cleanup_failure();
                }

                if cancel.is_cancelled() {
                    Err(ZipError::Cancelled)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Open the output sink, stream every entry through it and settle it:
    /// committed on success, aborted on any error.
    async fn write_archive<S>(&self, target: &str, paths: &[S], cancel: &CancellationToken) -> Result<ArchiveSummary, ZipError>
    where
        S: AsRef<str> + Sync,
    {
        let mut sink = or_cancel(cancel, self.store.open_write(target, ZIP_CONTENT_TYPE))
            .await?
            .map_err(|e| ZipError::write_failure(target, e))?;

        let result = match self.write_entries(sink.as_mut(), target, paths, cancel).await {
            Ok(summary) => or_cancel(cancel, sink.close())
                .await
                .and_then(|closed| closed.map_err(|e| ZipError::write_failure(target, e)))
                .map(|()| summary),
            Err(e) => Err(e),
        };

        if result.is_err() {
            match tokio::time::timeout(self.cleanup_timeout, sink.abort()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(archive = target, error = %e, "failed to abort archive upload"),
                Err(_) => warn!(archive = target, "timed out aborting archive upload"),
            }
        }

        result
    }

    async fn write_entries<W, S>(
        &self,
        sink: &mut W,
        target: &str,
        paths: &[S],
        cancel: &CancellationToken,
    ) -> Result<ArchiveSummary, ZipError>
    where
        W: BlobSink + ?Sized,
        S: AsRef<str> + Sync,
    {
        let mut writer = ZipStreamWriter::new(sink, COMPRESSION_LEVEL);

        for path in paths {
            self.write_entry(&mut writer, target, path.as_ref(), cancel).await?;
        }

        or_cancel(cancel, writer.finish())
            .await?
            .map_err(|e| ZipError::archive_failure(target, e))
    }

    async fn write_entry<W: BlobSink + ?Sized>(
        &self,
        writer: &mut ZipStreamWriter<'_, W>,
        target: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ZipError> {
        let properties = or_cancel(cancel, self.store.properties(path))
            .await?
            .map_err(|e| ZipError::read_failure(path, e))?;
        let name = entry_name(path);

        debug!(path, entry = name, size = properties.length, "adding entry");

        or_cancel(cancel, writer.begin_entry(name, properties.length))
            .await?
            .map_err(|e| ZipError::archive_failure(target, e))?;

        let mut reader = or_cancel(cancel, self.store.open_read(path))
            .await?
            .map_err(|e| ZipError::read_failure(path, e))?;

        while let Some(chunk) = or_cancel(cancel, reader.try_next())
            .await?
            .map_err(|e| ZipError::read_failure(path, e))?
        {
            or_cancel(cancel, writer.write(&chunk))
                .await?
                .map_err(|e| ZipError::archive_failure(target, e))?;
        }

        or_cancel(cancel, writer.end_entry())
            .await?
            .map_err(|e| ZipError::archive_failure(target, e))
    }
}
