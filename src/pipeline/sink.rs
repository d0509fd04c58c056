//! Artifact sink: optional gzip layer over a freshly created file
//!
//! The file is opened with `create_new`, so an existing artifact is never
//! overwritten. Compressed bytes are drained from the encoder after every
//! write and handed to the async file writer, which keeps memory bounded to
//! roughly one page regardless of artifact size.
//!
//! A sink is consumed by either [`ArtifactSink::finish`] or
//! [`ArtifactSink::abort`]; the latter removes the partial file.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::ExecutionError;

const WRITE_BUFFER: usize = 1024 * 1024;

/// Write stream for one artifact
pub struct ArtifactSink {
    path: PathBuf,
    file: BufWriter<File>,
    encoder: Option<GzEncoder<Vec<u8>>>,
    bytes_written: u64,
}

impl ArtifactSink {
    /// Create the artifact file, failing if it already exists
    ///
    /// # Arguments
    /// * `path` - Artifact location
    /// * `compress` - Wrap the file in a gzip layer
    ///
    /// # Returns
    /// * `Result<Self, ExecutionError>` - Open sink, or `ArtifactExists` / I/O error
    pub async fn create(path: &Path, compress: bool) -> Result<Self, ExecutionError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    ExecutionError::ArtifactExists(path.to_path_buf())
                } else {
                    ExecutionError::Filesystem(format!(
                        "Failed to create {}: {}",
                        path.display(),
                        e
                    ))
                }
            })?;

        debug!("Created artifact {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::with_capacity(WRITE_BUFFER, file),
            encoder: compress.then(|| GzEncoder::new(Vec::new(), Compression::default())),
            bytes_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compress (if enabled) and write a chunk
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ExecutionError> {
        let compressed = match self.encoder.as_mut() {
            Some(encoder) => {
                encoder.write_all(bytes).map_err(|e| {
                    ExecutionError::Filesystem(format!("Failed to compress page: {}", e))
                })?;
                std::mem::take(encoder.get_mut())
            }
            None => return self.write_raw(bytes).await,
        };
        self.write_raw(&compressed).await
    }

    /// Flush all layers and close the file; returns bytes on disk
    pub async fn finish(mut self) -> Result<u64, ExecutionError> {
        if let Some(encoder) = self.encoder.take() {
            let tail = encoder.finish().map_err(|e| {
                ExecutionError::Filesystem(format!("Failed to finish compression: {}", e))
            })?;
            self.write_raw(&tail).await?;
        }
        self.file.flush().await.map_err(|e| {
            ExecutionError::Filesystem(format!("Failed to flush {}: {}", self.path.display(), e))
        })?;
        self.file.get_mut().sync_all().await.map_err(|e| {
            ExecutionError::Filesystem(format!("Failed to sync {}: {}", self.path.display(), e))
        })?;
        debug!("Closed artifact {} ({} bytes)", self.path.display(), self.bytes_written);
        Ok(self.bytes_written)
    }

    /// Close the file and remove it
    pub async fn abort(self) {
        let ArtifactSink { path, file, .. } = self;
        drop(file);
        remove_artifact(&path).await;
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ExecutionError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.file.write_all(bytes).await.map_err(|e| {
            ExecutionError::Filesystem(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

/// Best-effort removal of an artifact
pub async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed artifact {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove artifact {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[tokio::test]
    async fn test_gzip_round_trip_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv.gz");

        let mut sink = ArtifactSink::create(&path, true).await.unwrap();
        sink.write(b"id,name\n").await.unwrap();
        sink.write(b"1,Alice\n").await.unwrap();
        let size = sink.finish().await.unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(raw.len() as u64, size);
        let mut text = String::new();
        GzDecoder::new(&raw[..]).read_to_string(&mut text).unwrap();
        assert_eq!(text, "id,name\n1,Alice\n");
    }

    #[tokio::test]
    async fn test_existing_file_is_not_touched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.csv");
        std::fs::write(&path, b"keep me").unwrap();

        let err = ArtifactSink::create(&path, false).await.err().unwrap();
        assert!(matches!(err, ExecutionError::ArtifactExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn test_abort_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.jsonl");

        let mut sink = ArtifactSink::create(&path, false).await.unwrap();
        sink.write(b"{}\n").await.unwrap();
        sink.abort().await;
        assert!(!path.exists());
    }
}
