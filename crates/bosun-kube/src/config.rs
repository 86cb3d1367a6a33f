//! Release server configuration
//!
//! Loaded from YAML, every field optional:
//!
//! ```yaml
//! driver: file
//! path: /var/lib/bosun/releases
//! compression:
//!   method: zstd
//!   level: 3
//! maxHistory: 10
//! timeout: 5m
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::DEFAULT_TIMEOUT;
use crate::error::{KubeError, Result};
use crate::storage::{
    CompressionMethod, DEFAULT_STORAGE_NAMESPACE, FileDriver, MemoryDriver, SecretsDriver,
    Storage,
};

/// Environment variable overriding the configured driver
pub const STORAGE_DRIVER_ENV: &str = "BOSUN_STORAGE_DRIVER";

/// Storage backend for release records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Memory,
    File,
    Secrets,
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DriverKind::Memory => "memory",
            DriverKind::File => "file",
            DriverKind::Secrets => "secrets",
        })
    }
}

impl FromStr for DriverKind {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(DriverKind::Memory),
            "file" => Ok(DriverKind::File),
            // Helm spells it in the singular
            "secret" | "secrets" => Ok(DriverKind::Secrets),
            other => Err(KubeError::InvalidConfig(format!(
                "unknown storage driver '{other}'"
            ))),
        }
    }
}

/// Release server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub driver: DriverKind,

    /// Record directory of the file driver
    pub path: PathBuf,

    /// Namespace holding the Secrets of the secrets driver
    pub namespace: String,

    pub compression: CompressionMethod,

    /// Revisions kept per release; 0 keeps everything
    pub max_history: usize,

    /// Default bound on hook and apply phases, for
    /// [`ReleaseServer::with_default_timeout`](crate::server::ReleaseServer::with_default_timeout)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            path: PathBuf::from(".bosun/releases"),
            namespace: DEFAULT_STORAGE_NAMESPACE.to_string(),
            compression: CompressionMethod::default(),
            max_history: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)?.with_env_overrides()
    }

    /// Apply `BOSUN_STORAGE_DRIVER`, if set
    pub fn with_env_overrides(self) -> Result<Self> {
        let driver = std::env::var(STORAGE_DRIVER_ENV).ok();
        self.with_driver_override(driver.as_deref())
    }

    /// Replace the driver with `value` when one is given
    pub fn with_driver_override(mut self, value: Option<&str>) -> Result<Self> {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.driver = value.parse()?;
            debug!(driver = %self.driver, "storage driver overridden from environment");
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.driver == DriverKind::File && self.path.as_os_str().is_empty() {
            return Err(KubeError::InvalidConfig(
                "the file driver needs a path".to_string(),
            ));
        }
        if self.driver == DriverKind::Secrets && self.namespace.is_empty() {
            return Err(KubeError::InvalidConfig(
                "the secrets driver needs a namespace".to_string(),
            ));
        }
        match self.compression {
            CompressionMethod::Gzip { level } if level > 9 => Err(KubeError::InvalidConfig(
                format!("gzip level {level} is out of range 0-9"),
            )),
            CompressionMethod::Zstd { level } if !(1..=22).contains(&level) => Err(
                KubeError::InvalidConfig(format!("zstd level {level} is out of range 1-22")),
            ),
            _ => Ok(()),
        }
    }

    /// Build the release store this configuration describes
    pub async fn open_storage(&self) -> Result<Storage> {
        self.validate()?;

        let storage = match self.driver {
            DriverKind::Memory => Storage::new(MemoryDriver::new()),
            DriverKind::File => Storage::new(FileDriver::new(&self.path, self.compression)?),
            DriverKind::Secrets => {
                Storage::new(SecretsDriver::new(&self.namespace, self.compression).await?)
            }
        };
        debug!(driver = %self.driver, max_history = self.max_history, "opened release storage");
        Ok(storage.with_max_history(self.max_history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.driver, DriverKind::Memory);
        assert_eq!(config.namespace, "kube-system");
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_from_yaml() {
        let config = ServerConfig::from_yaml(
            "driver: file\npath: /tmp/releases\ncompression:\n  method: gzip\n  level: 9\nmaxHistory: 5\ntimeout: 90s\n",
        )
        .unwrap();

        assert_eq!(config.driver, DriverKind::File);
        assert_eq!(config.path, PathBuf::from("/tmp/releases"));
        assert_eq!(config.compression, CompressionMethod::Gzip { level: 9 });
        assert_eq!(config.max_history, 5);
        assert_eq!(config.timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_validation() {
        assert!(ServerConfig::from_yaml("compression:\n  method: zstd\n  level: 40").is_err());
        assert!(ServerConfig::from_yaml("compression:\n  method: gzip\n  level: 10").is_err());
        assert!(ServerConfig::from_yaml("driver: file\npath: ''").is_err());
        assert!(ServerConfig::from_yaml("driver: floppy").is_err());
    }

    #[test]
    fn test_driver_override() {
        let config = ServerConfig::default()
            .with_driver_override(Some("Secret"))
            .unwrap();
        assert_eq!(config.driver, DriverKind::Secrets);

        let config = ServerConfig::default().with_driver_override(Some("")).unwrap();
        assert_eq!(config.driver, DriverKind::Memory);

        assert!(ServerConfig::default().with_driver_override(Some("tape")).is_err());
    }

    #[tokio::test]
    async fn test_open_file_storage() {
        let tmp = TempDir::new().unwrap();
        let config = ServerConfig {
            driver: DriverKind::File,
            path: tmp.path().join("releases"),
            ..Default::default()
        };

        let storage = config.open_storage().await.unwrap();
        assert_eq!(storage.driver().name(), "file");
        assert!(tmp.path().join("releases").is_dir());
    }
}
