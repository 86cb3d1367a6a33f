//! Error types for bosun-kube

use thiserror::Error;

/// Result type for bosun-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while storing, rendering or upgrading releases
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Release name missing or not a valid name
    #[error("no release name set, or the name is invalid")]
    MissingRelease,

    /// Update request without a chart
    #[error("no chart provided")]
    MissingChart,

    /// No record stored under this key
    #[error("release: not found: {key}")]
    ReleaseNotFound { key: String },

    /// A record is already stored under this key
    #[error("release: already exists: {key}")]
    ReleaseAlreadyExists { key: String },

    /// No revision of the release is deployed
    #[error("\"{name}\" has no deployed releases")]
    NoDeployedRelease { name: String },

    /// The release has no stored revisions at all
    #[error("no revision for release \"{name}\"")]
    NoRevision { name: String },

    /// The execution module failed to apply the new revision
    #[error("Upgrade \"{name}\" failed: {message}")]
    UpgradeFailed { name: String, message: String },

    /// Hook execution failed
    #[error("hook '{hook_name}' failed during {phase}: {message}")]
    HookFailed {
        hook_name: String,
        phase: String,
        message: String,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Template rendering error
    #[error("template error: {0}")]
    Template(String),

    /// Chart or values error
    #[error("chart error: {0}")]
    Chart(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Timeout
    #[error("operation timed out after {0}")]
    Timeout(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<bosun_core::CoreError> for KubeError {
    fn from(e: bosun_core::CoreError) -> Self {
        KubeError::Chart(e.to_string())
    }
}

impl From<bosun_engine::EngineError> for KubeError {
    fn from(e: bosun_engine::EngineError) -> Self {
        KubeError::Template(e.to_string())
    }
}

impl KubeError {
    /// No record (or no Kubernetes object) was found
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::ReleaseNotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// A create lost against an existing record or object
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::ReleaseAlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }
}
