//! Storage drivers for persisting release records
//!
//! A driver is a key/value store over [`Release`] records with an
//! exact-match label query. Bosun ships three drivers:
//! - **Memory** (default): process-local, for tests and ephemeral use
//! - **File**: one compressed JSON file per record, for local persistence
//! - **Secrets**: one Kubernetes Secret per record, for in-cluster persistence
//!
//! The [`Storage`] release store sits on top of a driver and owns the
//! keying scheme and the release-domain queries.

mod file;
mod memory;
mod secrets;
mod store;

pub use file::FileDriver;
pub use memory::{MemoryDriver, OperationCounts};
pub use secrets::{DEFAULT_STORAGE_NAMESPACE, SecretsDriver};
pub use store::{Storage, split_name};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KubeError, Result};
use crate::release::Release;

/// Label carrying the release name
pub const LABEL_NAME: &str = "NAME";
/// Label carrying the release namespace
pub const LABEL_NAMESPACE: &str = "NAMESPACE";
/// Label identifying records written by Bosun
pub const LABEL_OWNER: &str = "OWNER";
/// Label carrying the status name (`DEPLOYED`, `SUPERSEDED`, ...)
pub const LABEL_STATUS: &str = "STATUS";
/// Label carrying the revision number
pub const LABEL_VERSION: &str = "VERSION";
/// Value of [`LABEL_OWNER`]
pub const OWNER: &str = "BOSUN";

/// A release predicate used by [`StorageDriver::list`]
pub type ReleaseFilter<'a> = &'a (dyn Fn(&Release) -> bool + Send + Sync);

/// Storage driver trait for release persistence
///
/// Every mutation is atomic per key. `create` never overwrites: it is the
/// only guard against two writers producing the same revision.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name, for logs
    fn name(&self) -> &'static str;

    /// Fetch the record stored under `key`
    async fn get(&self, key: &str) -> Result<Release>;

    /// Store a new record; fails with `ReleaseAlreadyExists` if `key` is taken
    async fn create(&self, key: &str, release: &Release) -> Result<()>;

    /// Replace an existing record; fails with `ReleaseNotFound` if absent
    async fn update(&self, key: &str, release: &Release) -> Result<()>;

    /// Remove and return the record stored under `key`
    async fn delete(&self, key: &str) -> Result<Release>;

    /// All records matching `filter`
    async fn list(&self, filter: ReleaseFilter<'_>) -> Result<Vec<Release>>;

    /// All records whose labels contain every pair in `labels`
    ///
    /// No match is an empty result, not an error.
    async fn query(&self, labels: &Labels) -> Result<Vec<Release>>;
}

/// Exact-match index labels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether every pair in `query` is present in `self`
    pub fn matches(&self, query: &Labels) -> bool {
        query.0.iter().all(|(k, v)| self.0.get(k) == Some(v))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Index labels for a record
pub fn release_labels(release: &Release) -> Labels {
    Labels::new()
        .with(LABEL_NAME, release.name.as_str())
        .with(LABEL_NAMESPACE, release.namespace.as_str())
        .with(LABEL_OWNER, OWNER)
        .with(LABEL_STATUS, release.info.status.as_str())
        .with(LABEL_VERSION, release.version.to_string())
}

/// Compression method for stored records
///
/// In configuration files: `{method: zstd, level: 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip {
        #[serde(default = "default_gzip_level")]
        level: u32,
    },

    /// Zstd compression (better ratio, faster)
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

impl CompressionMethod {
    /// Label value recorded next to compressed data
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Gzip { .. } => "gzip",
            CompressionMethod::Zstd { .. } => "zstd",
        }
    }

    /// Inverse of [`CompressionMethod::as_str`], with default levels
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CompressionMethod::None),
            "gzip" => Some(CompressionMethod::Gzip { level: 6 }),
            "zstd" => Some(CompressionMethod::Zstd { level: 3 }),
            _ => None,
        }
    }

    /// Guess the method from a payload's magic bytes
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [0x28, 0xb5, 0x2f, 0xfd, ..] => CompressionMethod::Zstd { level: 3 },
            [0x1f, 0x8b, ..] => CompressionMethod::Gzip { level: 6 },
            _ => CompressionMethod::None,
        }
    }
}

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { .. } => {
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Serialize and compress a record
pub fn encode_release(release: &Release, method: CompressionMethod) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(release)?;
    compress(&json, method)
}

/// Decompress and deserialize a record
pub fn decode_release(data: &[u8], method: CompressionMethod) -> Result<Release> {
    let json = decompress(data, method)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Encode a record as base64 text (serialize + compress + base64)
pub fn encode_for_storage(release: &Release, method: CompressionMethod) -> Result<String> {
    let compressed = encode_release(release, method)?;
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        &compressed,
    ))
}

/// Decode a record from base64 text (base64 + decompress + deserialize)
pub fn decode_from_storage(data: &str, method: CompressionMethod) -> Result<Release> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data)
        .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
    decode_release(&decoded, method)
}
