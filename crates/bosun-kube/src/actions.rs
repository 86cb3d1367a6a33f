//! Release operation requests

use std::collections::BTreeMap;
use std::time::Duration;

use bosun_core::{Chart, Values};

use crate::release::Status;

/// Default bound on the hook and apply phases
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Request to move a release to a new revision
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// Release name
    pub name: String,

    /// Chart to render the new revision from
    pub chart: Option<Chart>,

    /// Values supplied for this revision
    pub values: Values,

    /// Render and validate only; nothing is persisted or applied
    pub dry_run: bool,

    /// Skip pre- and post-upgrade hooks
    pub disable_hooks: bool,

    /// Ignore the current revision's values
    pub reset_values: bool,

    /// Merge the request values over the current revision's values
    pub reuse_values: bool,

    /// Bound on each hook phase and on the apply phase; the server's
    /// default when unset
    pub timeout: Option<Duration>,

    /// Metadata recorded on the new revision
    pub annotations: BTreeMap<String, String>,
}

impl UpdateRequest {
    pub fn new(name: impl Into<String>, chart: Chart) -> Self {
        Self {
            name: name.into(),
            chart: Some(chart),
            values: Values::new(),
            dry_run: false,
            disable_hooks: false,
            reset_values: false,
            reuse_values: false,
            timeout: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_disable_hooks(mut self, disable: bool) -> Self {
        self.disable_hooks = disable;
        self
    }

    pub fn with_reset_values(mut self, reset: bool) -> Self {
        self.reset_values = reset;
        self
    }

    pub fn with_reuse_values(mut self, reuse: bool) -> Self {
        self.reuse_values = reuse;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }
}

/// Selection of releases for listing
///
/// An empty status set selects deployed releases only.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Regular expression the release name must match
    pub name: Option<String>,

    pub namespace: Option<String>,

    pub statuses: Vec<Status>,

    /// Maximum number of releases returned; 0 returns all
    pub limit: usize,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, pattern: impl Into<String>) -> Self {
        self.name = Some(pattern.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Statuses to select, defaulting to `DEPLOYED`
    pub fn effective_statuses(&self) -> Vec<Status> {
        if self.statuses.is_empty() {
            vec![Status::Deployed]
        } else {
            self.statuses.clone()
        }
    }
}
