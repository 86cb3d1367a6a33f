//! The release server: upgrade orchestration and release queries
//!
//! An upgrade runs as one sequential workflow:
//!
//! ```text
//! validate -> prepare -> dry run
//!                     -> pre-upgrade hooks -> apply -> post-upgrade hooks -> commit
//! ```
//!
//! Nothing is persisted before the apply phase. When apply fails the current
//! revision is marked `SUPERSEDED` and the new one `FAILED`, both are
//! written, and the error is returned. On success the current revision is
//! marked `SUPERSEDED` before the new one is created as `DEPLOYED`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bosun_core::{Chart, ReleaseOptions, Values};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::actions::{DEFAULT_TIMEOUT, ListFilter, UpdateRequest};
use crate::cluster::{CapabilitiesSource, ManifestValidator, ReleaseModule};
use crate::error::{KubeError, Result};
use crate::hooks::{HookPhase, HookRunner};
use crate::release::{Info, Release, Status};
use crate::render::Renderer;
use crate::storage::{ReleaseFilter, Storage};

static VALID_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])+$").expect("valid regex")
});

/// Whether `name` is acceptable as a release name
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Collaborators shared by every operation
pub struct Environment {
    pub releases: Storage,
    pub renderer: Arc<dyn Renderer>,
    pub validator: Arc<dyn ManifestValidator>,
}

/// Release server
pub struct ReleaseServer {
    env: Environment,
    module: Arc<dyn ReleaseModule>,
    hooks: Arc<dyn HookRunner>,
    capabilities: Arc<dyn CapabilitiesSource>,
    /// Bound used when a request sets none
    default_timeout: Duration,
}

/// Current and candidate revisions of an upgrade
struct PreparedUpdate {
    current: Release,
    updated: Release,
}

impl ReleaseServer {
    pub fn new(
        env: Environment,
        module: Arc<dyn ReleaseModule>,
        hooks: Arc<dyn HookRunner>,
        capabilities: Arc<dyn CapabilitiesSource>,
    ) -> Self {
        Self {
            env,
            module,
            hooks,
            capabilities,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bound hook and apply phases of requests without their own timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn releases(&self) -> &Storage {
        &self.env.releases
    }

    /// Move a release to a new revision
    ///
    /// Returns the new revision: `DEPLOYED` on success, or the unpersisted
    /// candidate for a dry run.
    pub async fn update_release(&self, req: &UpdateRequest) -> Result<Release> {
        validate_request(req)?;

        let PreparedUpdate { current, mut updated } = self.prepare_update(req).await?;

        if req.dry_run {
            info!(release = %updated.name, revision = updated.version, "dry run for upgrade");
            updated.info.description = "Dry run complete".to_string();
            return Ok(updated);
        }

        self.perform_update(current, updated, req).await
    }

    async fn prepare_update(&self, req: &UpdateRequest) -> Result<PreparedUpdate> {
        let chart = req.chart.as_ref().ok_or(KubeError::MissingChart)?;

        let current = self.env.releases.last(&req.name).await?;
        let (chart, config) = resolve_values(chart, req, &current);

        let revision = current.version + 1;
        let now = Utc::now();
        let options = ReleaseOptions::for_upgrade(&req.name, &current.namespace, revision).with_time(now);

        let caps = self.capabilities.capabilities().await?;
        let rendered = self.env.renderer.render(&chart, &config, &options, &caps)?;

        let manifest = rendered.manifest.to_string();
        self.env
            .validator
            .validate(&current.namespace, manifest.as_bytes())?;

        let mut updated = Release::new(req.name.clone(), current.namespace.clone(), revision, chart);
        updated.config = config;
        updated.manifest = manifest;
        updated.hooks = rendered.hooks;
        updated.annotations = req.annotations.clone();
        updated.info = Info {
            status: Status::Unknown,
            description: "Preparing upgrade".to_string(),
            first_deployed: current.info.first_deployed,
            last_deployed: now,
            deleted: None,
            notes: rendered.notes,
        };

        debug!(release = %updated.name, revision, hooks = updated.hooks.len(), "prepared upgrade");
        Ok(PreparedUpdate { current, updated })
    }

    async fn perform_update(
        &self,
        mut current: Release,
        mut updated: Release,
        req: &UpdateRequest,
    ) -> Result<Release> {
        let timeout = req.timeout.unwrap_or(self.default_timeout);

        if !req.disable_hooks {
            self.run_hooks(&updated, HookPhase::PreUpgrade, timeout).await?;
        } else {
            debug!(release = %updated.name, "pre-upgrade hooks disabled");
        }

        info!(release = %updated.name, from = current.version, to = updated.version, "applying upgrade");
        let applied = bounded(
            timeout,
            "apply",
            self.module.update(&current, &updated, req, &self.env),
        )
        .await;

        if let Err(e) = applied {
            return Err(self.record_failure(current, updated, e).await);
        }

        if !req.disable_hooks {
            self.run_hooks(&updated, HookPhase::PostUpgrade, timeout).await?;
        } else {
            debug!(release = %updated.name, "post-upgrade hooks disabled");
        }

        // The cluster already runs the new revision: record it even when
        // superseding the old one fails, then report the first error.
        current.mark_superseded();
        let superseded = self.env.releases.update(&current).await;
        if let Err(e) = &superseded {
            warn!(release = %current.name, revision = current.version, error = %e, "failed to record superseded revision");
        }

        updated.mark_deployed("Upgrade complete");
        let created = self.env.releases.create(&updated).await;
        superseded.and(created)?;

        info!(release = %updated.name, revision = updated.version, "upgrade complete");
        Ok(updated)
    }

    /// Persist the failed upgrade and build the error returned to the caller
    ///
    /// Both writes are attempted even when the first one fails.
    async fn record_failure(&self, mut current: Release, mut updated: Release, cause: KubeError) -> KubeError {
        let failure = KubeError::UpgradeFailed {
            name: updated.name.clone(),
            message: cause.to_string(),
        };
        warn!(release = %updated.name, revision = updated.version, error = %cause, "upgrade failed");

        current.mark_superseded();
        updated.mark_failed(failure.to_string());

        let mut message = cause.to_string();
        if let Err(e) = self.env.releases.update(&current).await {
            warn!(release = %current.name, revision = current.version, error = %e, "failed to record superseded revision");
            message.push_str(&format!("; recording revision {} failed: {}", current.version, e));
        }
        if let Err(e) = self.env.releases.create(&updated).await {
            warn!(release = %updated.name, revision = updated.version, error = %e, "failed to record failed revision");
            message.push_str(&format!("; recording revision {} failed: {}", updated.version, e));
        }

        KubeError::UpgradeFailed {
            name: updated.name,
            message,
        }
    }

    async fn run_hooks(&self, release: &Release, phase: HookPhase, timeout: Duration) -> Result<()> {
        debug!(release = %release.name, %phase, "executing hooks");
        bounded(
            timeout,
            phase.as_str(),
            self.hooks
                .exec_hook(&release.hooks, &release.name, &release.namespace, phase, timeout),
        )
        .await
    }

    /// One revision of a release; version 0 selects the latest
    pub async fn release_status(&self, name: &str, version: u32) -> Result<Release> {
        if version == 0 {
            self.env.releases.last(name).await
        } else {
            self.env.releases.get(name, version).await
        }
    }

    /// Revisions of a release, newest first; `max` of 0 returns all
    pub async fn release_history(&self, name: &str, max: usize) -> Result<Vec<Release>> {
        let mut history = self.env.releases.history(name).await?;
        history.reverse();
        if max > 0 {
            history.truncate(max);
        }
        Ok(history)
    }

    /// Releases matching `filter`, sorted by name then revision
    pub async fn list_releases(&self, filter: &ListFilter) -> Result<Vec<Release>> {
        let name_re = filter
            .name
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| KubeError::InvalidConfig(format!("invalid name filter: {e}")))?;
        let statuses = filter.effective_statuses();

        let by_status = |r: &Release| statuses.contains(&r.info.status);
        let by_namespace = |r: &Release| filter.namespace.as_deref().is_none_or(|ns| r.namespace == ns);
        let by_name = |r: &Release| name_re.as_ref().is_none_or(|re| re.is_match(&r.name));
        let filters: [ReleaseFilter<'_>; 3] = [&by_status, &by_namespace, &by_name];

        let mut releases = self.env.releases.list_filter_all(&filters).await?;
        releases.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        if filter.limit > 0 {
            releases.truncate(filter.limit);
        }
        Ok(releases)
    }
}

fn validate_request(req: &UpdateRequest) -> Result<()> {
    if !is_valid_name(&req.name) {
        return Err(KubeError::MissingRelease);
    }
    if req.chart.is_none() {
        return Err(KubeError::MissingChart);
    }
    Ok(())
}

/// Chart and config for the new revision
///
/// - `reset_values`: the request values only
/// - `reuse_values`: the request values over the current config, with the
///   current chart defaults and config folded into the chart defaults
/// - otherwise: the request values, or the current config when the request
///   has none
fn resolve_values(chart: &Chart, req: &UpdateRequest, current: &Release) -> (Chart, Values) {
    if req.reset_values {
        return (chart.clone(), req.values.clone());
    }

    if req.reuse_values {
        let mut chart = chart.clone();
        chart.values = Values::merged(&current.chart.values, &current.config);
        return (chart, Values::merged(&current.config, &req.values));
    }

    if req.values.is_empty() && !current.config.is_empty() {
        debug!(release = %req.name, "copying values from current revision");
        return (chart.clone(), current.config.clone());
    }

    (chart.clone(), req.values.clone())
}

/// Run `fut`, failing with `Timeout` once `timeout` elapses
async fn bounded<T>(timeout: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| KubeError::Timeout(format!("{timeout:?} ({what})")))?
}
