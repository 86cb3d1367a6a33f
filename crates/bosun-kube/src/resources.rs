//! Dynamic Kubernetes resource operations
//!
//! Manifests are parsed into [`DynamicObject`]s and resolved against API
//! discovery, so any resource type the cluster serves can be applied
//! (Server-Side Apply) or deleted without compile-time type knowledge.

use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::manifest::kind_order;

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "bosun";

/// Identity of a resource within a cluster: (group, kind, namespace, name)
pub type ResourceKey = (String, String, Option<String>, String);

/// A manifest document resolved against discovery
#[derive(Debug, Clone)]
pub struct ParsedResource {
    obj: DynamicObject,
    gvk: GroupVersionKind,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl ParsedResource {
    pub fn name(&self) -> &str {
        self.obj.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace for namespaced resources, empty for cluster-scoped ones
    pub fn namespace(&self) -> &str {
        self.obj.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn kind(&self) -> &str {
        &self.gvk.kind
    }

    /// Identity used to match resources across revisions
    ///
    /// The version is left out so that moving a resource to a newer
    /// apiVersion is not seen as a delete plus a create.
    pub fn key(&self) -> ResourceKey {
        (
            self.gvk.group.clone(),
            self.gvk.kind.clone(),
            self.obj.metadata.namespace.clone(),
            self.name().to_string(),
        )
    }

    fn display_name(&self) -> String {
        match &self.obj.metadata.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.gvk.kind, self.name()),
            None => format!("{}/{}", self.gvk.kind, self.name()),
        }
    }
}

/// Applies and deletes manifest resources against a cluster
pub struct ResourceManager {
    client: Client,
    /// Cached discovery information
    discovery: Discovery,
}

impl ResourceManager {
    /// Create a manager, running API discovery once
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    /// Create from an existing client and discovery
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self { client, discovery }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Every `group/version` (or bare `version` for the core group) served
    pub fn api_versions(&self) -> Vec<String> {
        let mut versions = Vec::new();
        for group in self.discovery.groups() {
            for version in group.versions() {
                if group.name().is_empty() {
                    versions.push(version.to_string());
                } else {
                    versions.push(format!("{}/{}", group.name(), version));
                }
            }
        }
        versions.sort();
        versions
    }

    /// Parse every document of a manifest, in install order
    pub fn parse_manifest(&self, manifest: &str, default_namespace: &str) -> Result<Vec<ParsedResource>> {
        let mut resources = Vec::new();
        for (index, doc) in bosun_engine::split_documents(manifest).iter().enumerate() {
            let resource = self.parse_document(doc, default_namespace).map_err(|e| {
                KubeError::InvalidManifest(format!("document {index}: {e}"))
            })?;
            resources.push(resource);
        }

        resources.sort_by_key(|r| kind_order(r.kind()));
        Ok(resources)
    }

    /// Parse and resolve a single YAML document
    pub fn parse_document(&self, doc: &str, default_namespace: &str) -> Result<ParsedResource> {
        let mut obj: DynamicObject = serde_yaml::from_str(doc)
            .map_err(|e| KubeError::InvalidManifest(format!("YAML parse error: {}", e)))?;

        let type_meta = obj.types.as_ref().ok_or_else(|| {
            KubeError::InvalidManifest("resource missing apiVersion or kind".to_string())
        })?;
        if obj.metadata.name.as_deref().is_none_or(str::is_empty) {
            return Err(KubeError::InvalidManifest(format!(
                "{} is missing metadata.name",
                type_meta.kind
            )));
        }

        let gvk = gvk_from_type_meta(type_meta);
        let (api_resource, capabilities) = self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
            KubeError::InvalidManifest(format!(
                "unknown resource type: {}/{}",
                type_meta.api_version, type_meta.kind
            ))
        })?;

        if capabilities.scope == Scope::Namespaced {
            if obj.metadata.namespace.as_deref().is_none_or(str::is_empty) {
                obj.metadata.namespace = Some(default_namespace.to_string());
            }
        } else {
            obj.metadata.namespace = None;
        }

        Ok(ParsedResource {
            obj,
            gvk,
            api_resource,
            capabilities,
        })
    }

    /// Server-side apply, taking ownership of conflicting fields
    pub async fn apply(&self, resource: &ParsedResource) -> Result<()> {
        debug!(resource = %resource.display_name(), "applying resource");

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        self.api_for(resource)
            .patch(resource.name(), &params, &Patch::Apply(&resource.obj))
            .await?;
        Ok(())
    }

    /// Delete a resource; returns false if it was already gone
    pub async fn delete(&self, resource: &ParsedResource) -> Result<bool> {
        debug!(resource = %resource.display_name(), "deleting resource");

        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        match self.api_for(resource).delete(resource.name(), &params).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn api_for(&self, resource: &ParsedResource) -> Api<DynamicObject> {
        if resource.capabilities.scope == Scope::Namespaced {
            Api::namespaced_with(self.client.clone(), resource.namespace(), &resource.api_resource)
        } else {
            Api::all_with(self.client.clone(), &resource.api_resource)
        }
    }
}

/// Convert TypeMeta to GroupVersionKind
///
/// - "apps/v1" -> group="apps", version="v1"
/// - "v1" -> group="", version="v1" (core API)
pub(crate) fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}
