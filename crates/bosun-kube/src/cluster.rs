//! Cluster collaborators of the release server
//!
//! The server talks to the cluster only through the traits below.
//! [`KubeCluster`] implements all of them against a live cluster;
//! [`StaticCapabilities`] serves a fixed capability set for offline use.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bosun_core::{Capabilities, KubeVersion};
use kube::Client;
use tracing::{info, warn};

use crate::actions::UpdateRequest;
use crate::error::{KubeError, Result};
use crate::hooks::KubeHookRunner;
use crate::release::Release;
use crate::resources::{ResourceKey, ResourceManager};
use crate::server::Environment;

/// Source of the cluster's version and served API versions
#[async_trait]
pub trait CapabilitiesSource: Send + Sync {
    async fn capabilities(&self) -> Result<Capabilities>;
}

/// Checks a rendered manifest before anything is applied
pub trait ManifestValidator: Send + Sync {
    fn validate(&self, namespace: &str, manifest: &[u8]) -> Result<()>;
}

/// Moves the cluster from one revision's resources to another's
#[async_trait]
pub trait ReleaseModule: Send + Sync {
    async fn update(
        &self,
        current: &Release,
        target: &Release,
        req: &UpdateRequest,
        env: &Environment,
    ) -> Result<()>;
}

/// A fixed capability set
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities(pub Capabilities);

#[async_trait]
impl CapabilitiesSource for StaticCapabilities {
    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.0.clone())
    }
}

/// Cluster access through a discovery-backed [`ResourceManager`]
#[derive(Clone)]
pub struct KubeCluster {
    resources: Arc<ResourceManager>,
}

impl KubeCluster {
    /// Connect with `client` and run API discovery
    pub async fn new(client: Client) -> Result<Self> {
        Ok(Self::with_resources(Arc::new(ResourceManager::new(client).await?)))
    }

    pub fn with_resources(resources: Arc<ResourceManager>) -> Self {
        Self { resources }
    }

    /// A hook runner sharing this cluster's discovery cache
    pub fn hook_runner(&self) -> KubeHookRunner {
        KubeHookRunner::new(self.resources.clone())
    }
}

#[async_trait]
impl CapabilitiesSource for KubeCluster {
    async fn capabilities(&self) -> Result<Capabilities> {
        let info = self.resources.client().apiserver_version().await?;
        Ok(Capabilities::new(
            KubeVersion::new(&info.git_version),
            self.resources.api_versions(),
        ))
    }
}

impl ManifestValidator for KubeCluster {
    fn validate(&self, namespace: &str, manifest: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(manifest)
            .map_err(|e| KubeError::InvalidManifest(format!("manifest is not UTF-8: {e}")))?;
        self.resources.parse_manifest(text, namespace).map(|_| ())
    }
}

#[async_trait]
impl ReleaseModule for KubeCluster {
    async fn update(
        &self,
        current: &Release,
        target: &Release,
        _req: &UpdateRequest,
        _env: &Environment,
    ) -> Result<()> {
        let desired = self
            .resources
            .parse_manifest(&target.manifest, &target.namespace)?;

        // An old manifest may use APIs the cluster no longer serves
        let previous = match self
            .resources
            .parse_manifest(&current.manifest, &current.namespace)
        {
            Ok(resources) => resources,
            Err(e) => {
                warn!(release = %current.name, error = %e, "cannot resolve current manifest, skipping stale resource cleanup");
                Vec::new()
            }
        };

        for resource in &desired {
            self.resources.apply(resource).await?;
        }

        let keep: HashSet<ResourceKey> = desired.iter().map(|r| r.key()).collect();
        let mut removed = 0;
        for resource in previous.iter().rev().filter(|r| !keep.contains(&r.key())) {
            if self.resources.delete(resource).await? {
                removed += 1;
            }
        }

        info!(
            release = %target.name,
            revision = target.version,
            applied = desired.len(),
            removed,
            "cluster updated"
        );
        Ok(())
    }
}
