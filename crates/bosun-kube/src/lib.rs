//! Bosun Kube - release lifecycle for Kubernetes
//!
//! This crate provides:
//! - **Storage**: versioned release records over memory, file or Secrets drivers
//! - **Release Server**: the upgrade workflow, from rendering to commit
//! - **Hooks**: `bosun.io/hook` resources with Helm-compatible annotations
//! - **Cluster integration**: discovery, manifest validation and server-side apply

pub mod actions;
pub mod annotations;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod release;
pub mod render;
pub mod resources;
pub mod server;
pub mod storage;

pub use actions::{ListFilter, UpdateRequest};
pub use annotations::DeletePolicy;
pub use cluster::{
    CapabilitiesSource, KubeCluster, ManifestValidator, ReleaseModule, StaticCapabilities,
};
pub use config::{DriverKind, ServerConfig};
pub use error::{KubeError, Result};
pub use hooks::{Hook, HookPhase, HookRunner, KubeHookRunner};
pub use manifest::{ManifestDocument, ManifestEntry};
pub use release::{Info, Release, Status};
pub use render::{EngineRenderer, Rendered, Renderer};
pub use resources::ResourceManager;
pub use server::{Environment, ReleaseServer};
pub use storage::{
    CompressionMethod, FileDriver, Labels, MemoryDriver, SecretsDriver, Storage, StorageDriver,
};
