//! Release manifest documents
//!
//! A release manifest is the concatenation of every non-hook resource,
//! each entry labelled with the template it came from:
//!
//! ```yaml
//! ---
//! # Source: web/templates/service.yaml
//! apiVersion: v1
//! kind: Service
//! ```

use std::collections::BTreeMap;
use std::fmt;

use bosun_core::Capabilities;
use serde_yaml::Value as YamlValue;

use crate::annotations::{self, bosun, helm};
use crate::error::{KubeError, Result};
use crate::hooks::{Hook, HookPhase};

const SOURCE_PREFIX: &str = "# Source: ";

/// Kinds in the order they are installed; anything else goes last
const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

/// Install position of a kind
pub fn kind_order(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(INSTALL_ORDER.len())
}

/// One resource of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Template path, e.g. `web/templates/service.yaml`
    pub path: String,
    pub content: String,
}

/// An ordered set of manifest entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDocument {
    entries: Vec<ManifestEntry>,
}

impl ManifestDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.entries.push(ManifestEntry {
            path: path.into(),
            content: content.into(),
        });
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse text produced by the `Display` impl back into entries
    ///
    /// Documents without a `# Source:` line get an empty path.
    pub fn parse(text: &str) -> Self {
        let mut doc = Self::new();
        for chunk in bosun_engine::split_documents(text) {
            let mut lines = chunk.lines();
            let first = lines.next().unwrap_or_default();
            match first.strip_prefix(SOURCE_PREFIX) {
                Some(path) => doc.push(path.trim(), lines.collect::<Vec<_>>().join("\n")),
                None => doc.push("", chunk.trim_end()),
            }
        }
        doc
    }
}

impl fmt::Display for ManifestDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "---")?;
            writeln!(f, "{}{}", SOURCE_PREFIX, entry.path)?;
            writeln!(f, "{}", entry.content.trim_end())?;
        }
        Ok(())
    }
}

/// Split rendered files into hooks and an install-ordered manifest
///
/// A document whose `apiVersion` is missing from a non-empty capability
/// set fails the render.
pub fn sort_manifests<'a>(
    files: impl IntoIterator<Item = (&'a String, &'a String)>,
    caps: &Capabilities,
) -> Result<(Vec<Hook>, ManifestDocument)> {
    let mut hooks = Vec::new();
    let mut resources: Vec<(usize, ManifestEntry)> = Vec::new();

    for (path, content) in files {
        for doc in bosun_engine::split_documents(content) {
            let head: YamlValue = serde_yaml::from_str(&doc).map_err(|e| {
                KubeError::InvalidManifest(format!("YAML parse error on {path}: {e}"))
            })?;

            let api_version = str_field(&head, &["apiVersion"]);
            let kind = str_field(&head, &["kind"]);

            if !api_version.is_empty() && !caps.supports(&api_version) {
                return Err(KubeError::Template(format!(
                    "apiVersion \"{api_version}\" in {path} is not available"
                )));
            }

            let annotations = annotations_of(&head);
            match annotations::get_annotation(&annotations, bosun::HOOK, helm::HOOK) {
                Some(events) => hooks.push(Hook {
                    name: str_field(&head, &["metadata", "name"]),
                    kind,
                    path: path.clone(),
                    manifest: doc.clone(),
                    events: annotations::parse_hook_phases(events)
                        .iter()
                        .filter_map(|e| e.parse::<HookPhase>().ok())
                        .collect(),
                    weight: annotations::parse_hook_weight(&annotations),
                    delete_policies: annotations::parse_delete_policies(&annotations),
                }),
                None => resources.push((
                    kind_order(&kind),
                    ManifestEntry {
                        path: path.clone(),
                        content: doc,
                    },
                )),
            }
        }
    }

    // stable, so same-kind resources keep render order
    resources.sort_by_key(|(order, _)| *order);

    let mut manifest = ManifestDocument::new();
    for (_, entry) in resources {
        manifest.push(entry.path, entry.content);
    }
    Ok((hooks, manifest))
}

fn str_field(value: &YamlValue, path: &[&str]) -> String {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(YamlValue::as_str)
        .unwrap_or_default()
        .to_string()
}

fn annotations_of(value: &YamlValue) -> BTreeMap<String, String> {
    value
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(YamlValue::as_mapping)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
