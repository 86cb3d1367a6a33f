//! File-based storage driver
//!
//! One file per record, `<base_dir>/<key>.release`, holding the compressed
//! JSON record. The compression method is detected when reading, so records
//! stay readable after the configured method changes.
//!
//! Records are written to a scratch file first and only then linked or
//! renamed into place, so a record file is always complete.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::{
    CompressionMethod, Labels, ReleaseFilter, StorageDriver, decode_release, encode_release,
    release_labels,
};
use crate::error::{KubeError, Result};
use crate::release::Release;

const EXTENSION: &str = "release";

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// File-based storage driver
pub struct FileDriver {
    /// Directory holding the record files
    base_dir: PathBuf,
    compression: CompressionMethod,
}

impl FileDriver {
    /// Create a new file driver, creating `base_dir` if needed
    pub fn new(base_dir: impl Into<PathBuf>, compression: CompressionMethod) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            compression,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn record_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(KubeError::Storage(format!(
                "key {key:?} cannot be used as a file name"
            )));
        }
        Ok(self.base_dir.join(format!("{key}.{EXTENSION}")))
    }

    /// A fresh scratch path, never listed as a record
    fn scratch_path(&self, key: &str) -> PathBuf {
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        self.base_dir
            .join(format!(".{key}.{}.{seq}.tmp", std::process::id()))
    }

    /// Write `data` to a synced scratch file and return its path
    async fn write_scratch(&self, key: &str, data: &[u8]) -> Result<PathBuf> {
        let scratch = self.scratch_path(key);
        match write_synced(&scratch, data).await {
            Ok(()) => Ok(scratch),
            Err(e) => {
                remove_scratch(&scratch).await;
                Err(e.into())
            }
        }
    }

    async fn read_record(&self, path: &Path) -> Result<Release> {
        let data = tokio::fs::read(path).await?;
        decode_release(&data, CompressionMethod::detect(&data))
    }

    /// Every readable record in the directory
    async fn read_all(&self) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != EXTENSION) {
                continue;
            }
            match self.read_record(&path).await {
                Ok(release) => releases.push(release),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable release record"),
            }
        }

        Ok(releases)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

async fn remove_scratch(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove scratch file");
    }
}

#[async_trait]
impl StorageDriver for FileDriver {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Release> {
        let path = self.record_path(key)?;
        match self.read_record(&path).await {
            Err(KubeError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(KubeError::ReleaseNotFound {
                    key: key.to_string(),
                })
            }
            other => other,
        }
    }

    async fn create(&self, key: &str, release: &Release) -> Result<()> {
        let path = self.record_path(key)?;
        let data = encode_release(release, self.compression)?;
        let scratch = self.write_scratch(key, &data).await?;

        // linking refuses an existing target, which makes create-if-absent atomic
        let linked = tokio::fs::hard_link(&scratch, &path).await;
        remove_scratch(&scratch).await;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(KubeError::ReleaseAlreadyExists {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, key: &str, release: &Release) -> Result<()> {
        let path = self.record_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(KubeError::ReleaseNotFound {
                key: key.to_string(),
            });
        }

        let data = encode_release(release, self.compression)?;
        let scratch = self.write_scratch(key, &data).await?;
        if let Err(e) = tokio::fs::rename(&scratch, &path).await {
            remove_scratch(&scratch).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<Release> {
        let release = self.get(key).await?;
        tokio::fs::remove_file(self.record_path(key)?).await?;
        Ok(release)
    }

    async fn list(&self, filter: ReleaseFilter<'_>) -> Result<Vec<Release>> {
        let mut releases = self.read_all().await?;
        releases.retain(|release| filter(release));
        Ok(releases)
    }

    async fn query(&self, labels: &Labels) -> Result<Vec<Release>> {
        let mut releases = self.read_all().await?;
        releases.retain(|release| release_labels(release).matches(labels));
        Ok(releases)
    }
}
