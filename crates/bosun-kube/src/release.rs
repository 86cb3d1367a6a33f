//! Release records and their lifecycle status

use std::collections::BTreeMap;
use std::fmt;

use bosun_core::{Chart, Values};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hooks::Hook;

/// One revision of a release, as persisted by the storage layer
///
/// A record is created once per revision. Afterwards only
/// `info.status`, `info.description` and `info.notes` change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Kubernetes namespace (may be empty)
    #[serde(default)]
    pub namespace: String,

    /// Revision number (1-indexed, dense per release)
    pub version: u32,

    pub info: Info,

    /// Chart this revision was rendered from
    pub chart: Chart,

    /// Values supplied by the caller (chart defaults excluded)
    #[serde(default)]
    pub config: Values,

    /// Rendered manifest (all non-hook resources)
    #[serde(default)]
    pub manifest: String,

    /// Lifecycle hooks, in render order
    #[serde(default)]
    pub hooks: Vec<Hook>,

    /// Caller-supplied metadata
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Status and timestamps of a revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Info {
    pub status: Status,

    /// Human-readable account of the last transition
    #[serde(default)]
    pub description: String,

    pub first_deployed: DateTime<Utc>,

    pub last_deployed: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,

    /// Rendered NOTES.txt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Info {
    pub fn new(status: Status, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status,
            description: description.into(),
            first_deployed: now,
            last_deployed: now,
            deleted: None,
            notes: None,
        }
    }
}

/// Lifecycle status of a revision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Unknown,
    Deployed,
    Deleted,
    Superseded,
    Failed,
    Deleting,
    PendingInstall,
    PendingUpgrade,
    PendingRollback,
}

impl Status {
    /// Name used in storage labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "UNKNOWN",
            Status::Deployed => "DEPLOYED",
            Status::Deleted => "DELETED",
            Status::Superseded => "SUPERSEDED",
            Status::Failed => "FAILED",
            Status::Deleting => "DELETING",
            Status::PendingInstall => "PENDING_INSTALL",
            Status::PendingUpgrade => "PENDING_UPGRADE",
            Status::PendingRollback => "PENDING_ROLLBACK",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Release {
    /// A fresh record in `UNKNOWN` status
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, version: u32, chart: Chart) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version,
            info: Info::new(Status::Unknown, ""),
            chart,
            config: Values::new(),
            manifest: String::new(),
            hooks: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.info.status
    }

    pub fn is_deployed(&self) -> bool {
        self.info.status == Status::Deployed
    }

    /// Mark as the live revision
    pub fn mark_deployed(&mut self, description: impl Into<String>) {
        self.info.status = Status::Deployed;
        self.info.description = description.into();
    }

    /// Mark as replaced by a newer revision
    pub fn mark_superseded(&mut self) {
        self.info.status = Status::Superseded;
    }

    pub fn mark_failed(&mut self, description: impl Into<String>) {
        self.info.status = Status::Failed;
        self.info.description = description.into();
    }
}

/// Predicate matching releases in `status`
pub fn status_filter(status: Status) -> impl Fn(&Release) -> bool + Send + Sync {
    move |release| release.info.status == status
}

/// Sort releases by ascending revision
pub fn sort_by_revision(releases: &mut [Release]) {
    releases.sort_by_key(|r| r.version);
}
