//! Hook annotation parsing with Helm compatibility
//!
//! Bosun reads `bosun.io/*` hook annotations and falls back to the
//! `helm.sh/*` spelling, so existing charts keep their hooks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bosun-native annotations
pub mod bosun {
    /// Hook phase annotation
    pub const HOOK: &str = "bosun.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "bosun.io/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "bosun.io/hook-delete-policy";
}

/// Helm-compatible annotations
pub mod helm {
    pub const HOOK: &str = "helm.sh/hook";
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
}

/// Get annotation value, preferring Bosun over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    bosun_key: &str,
    helm_key: &str,
) -> Option<&'a str> {
    annotations
        .get(bosun_key)
        .or_else(|| annotations.get(helm_key))
        .map(|s| s.as_str())
}

/// Split a comma-separated annotation value
pub fn parse_hook_phases(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse hook weight (default: 0)
pub fn parse_hook_weight(annotations: &BTreeMap<String, String>) -> i32 {
    get_annotation(annotations, bosun::HOOK_WEIGHT, helm::HOOK_WEIGHT)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Parse hook delete policies
///
/// Unknown entries are ignored. Without the annotation a hook keeps
/// `before-hook-creation`, which lets the same hook run on every revision.
pub fn parse_delete_policies(annotations: &BTreeMap<String, String>) -> Vec<DeletePolicy> {
    match get_annotation(annotations, bosun::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY) {
        Some(value) => parse_hook_phases(value)
            .iter()
            .filter_map(|p| DeletePolicy::from_name(p))
            .collect(),
        None => vec![DeletePolicy::BeforeHookCreation],
    }
}

/// When to delete a hook resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletePolicy {
    /// Delete a leftover resource of the same name before creating the hook
    BeforeHookCreation,
    /// Delete after successful completion
    HookSucceeded,
    /// Delete after failure
    HookFailed,
}

impl DeletePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "before-hook-creation" => Some(DeletePolicy::BeforeHookCreation),
            "hook-succeeded" => Some(DeletePolicy::HookSucceeded),
            "hook-failed" => Some(DeletePolicy::HookFailed),
            _ => None,
        }
    }
}
