//! Release lifecycle hooks
//!
//! A hook is a chart resource annotated with `bosun.io/hook` (or
//! `helm.sh/hook`). Hooks are kept out of the release manifest and executed
//! around the operation they are bound to, lowest weight first.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::Api;
use kube::runtime::wait::await_condition;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotations::DeletePolicy;
use crate::error::{KubeError, Result};
use crate::resources::{ParsedResource, ResourceManager};

/// Hook execution phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreInstall,
    PostInstall,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    PreDelete,
    PostDelete,
    /// Run on demand
    Test,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::PreInstall => "pre-install",
            HookPhase::PostInstall => "post-install",
            HookPhase::PreUpgrade => "pre-upgrade",
            HookPhase::PostUpgrade => "post-upgrade",
            HookPhase::PreRollback => "pre-rollback",
            HookPhase::PostRollback => "post-rollback",
            HookPhase::PreDelete => "pre-delete",
            HookPhase::PostDelete => "post-delete",
            HookPhase::Test => "test",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPhase {
    type Err = KubeError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pre-install" => HookPhase::PreInstall,
            "post-install" => HookPhase::PostInstall,
            "pre-upgrade" => HookPhase::PreUpgrade,
            "post-upgrade" => HookPhase::PostUpgrade,
            "pre-rollback" => HookPhase::PreRollback,
            "post-rollback" => HookPhase::PostRollback,
            "pre-delete" => HookPhase::PreDelete,
            "post-delete" => HookPhase::PostDelete,
            // the old name for test hooks
            "test" | "test-success" => HookPhase::Test,
            other => {
                return Err(KubeError::InvalidManifest(format!(
                    "unknown hook phase '{other}'"
                )));
            }
        })
    }
}

/// A hook resource extracted from a rendered chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// `metadata.name` of the resource
    pub name: String,

    pub kind: String,

    /// Template the hook was rendered from
    pub path: String,

    /// The resource, as YAML
    pub manifest: String,

    /// Phases the hook runs in
    pub events: Vec<HookPhase>,

    /// Lower weights run first
    #[serde(default)]
    pub weight: i32,

    #[serde(default)]
    pub delete_policies: Vec<DeletePolicy>,
}

impl Hook {
    pub fn runs_in(&self, phase: HookPhase) -> bool {
        self.events.contains(&phase)
    }

    pub fn has_delete_policy(&self, policy: DeletePolicy) -> bool {
        self.delete_policies.contains(&policy)
    }
}

/// Hooks bound to `phase`, in execution order (weight, then name)
pub fn hooks_for_phase(hooks: &[Hook], phase: HookPhase) -> Vec<&Hook> {
    let mut selected: Vec<&Hook> = hooks.iter().filter(|h| h.runs_in(phase)).collect();
    selected.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.name.cmp(&b.name)));
    selected
}

/// Executes the hooks of a phase
#[async_trait]
pub trait HookRunner: Send + Sync {
    /// Run every hook bound to `phase`, in order, stopping at the first
    /// failure. The whole phase is bounded by `timeout`.
    async fn exec_hook(
        &self,
        hooks: &[Hook],
        release_name: &str,
        namespace: &str,
        phase: HookPhase,
        timeout: Duration,
    ) -> Result<()>;
}

/// Hook runner backed by a Kubernetes cluster
///
/// Every hook is server-side applied. Jobs are then awaited until they
/// complete or fail; other kinds succeed as soon as they are applied.
pub struct KubeHookRunner {
    resources: Arc<ResourceManager>,
}

impl KubeHookRunner {
    pub fn new(resources: Arc<ResourceManager>) -> Self {
        Self { resources }
    }

    async fn run_phase(&self, hooks: &[&Hook], namespace: &str, phase: HookPhase) -> Result<()> {
        for hook in hooks {
            let resource = self
                .resources
                .parse_document(&hook.manifest, namespace)
                .map_err(|e| hook_failed(hook, phase, e.to_string()))?;

            if hook.has_delete_policy(DeletePolicy::BeforeHookCreation) {
                self.resources.delete(&resource).await?;
            }

            debug!(hook = %hook.name, kind = %hook.kind, weight = hook.weight, %phase, "executing hook");
            let outcome = self.run_one(hook, &resource, phase).await;

            let policy = match outcome {
                Ok(()) => DeletePolicy::HookSucceeded,
                Err(_) => DeletePolicy::HookFailed,
            };
            if hook.has_delete_policy(policy)
                && let Err(e) = self.resources.delete(&resource).await
            {
                warn!(hook = %hook.name, error = %e, "failed to delete hook resource");
            }

            outcome?;
        }
        Ok(())
    }

    async fn run_one(&self, hook: &Hook, resource: &ParsedResource, phase: HookPhase) -> Result<()> {
        self.resources
            .apply(resource)
            .await
            .map_err(|e| hook_failed(hook, phase, e.to_string()))?;

        if hook.kind != "Job" {
            return Ok(());
        }

        let jobs: Api<Job> = Api::namespaced(self.resources.client().clone(), resource.namespace());
        match await_condition(jobs, resource.name(), job_finished).await {
            Ok(Some(job)) if job_failed(&job) => Err(hook_failed(hook, phase, "job failed".to_string())),
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(hook_failed(
                hook,
                phase,
                "job was deleted before completion".to_string(),
            )),
            Err(e) => Err(hook_failed(hook, phase, format!("wait condition failed: {e}"))),
        }
    }
}

#[async_trait]
impl HookRunner for KubeHookRunner {
    async fn exec_hook(
        &self,
        hooks: &[Hook],
        release_name: &str,
        namespace: &str,
        phase: HookPhase,
        timeout: Duration,
    ) -> Result<()> {
        let selected = hooks_for_phase(hooks, phase);
        if selected.is_empty() {
            return Ok(());
        }

        info!(release = release_name, %phase, count = selected.len(), "running hooks");
        tokio::time::timeout(timeout, self.run_phase(&selected, namespace, phase))
            .await
            .map_err(|_| KubeError::Timeout(format!("{timeout:?} running {phase} hooks")))?
    }
}

fn hook_failed(hook: &Hook, phase: HookPhase, message: String) -> KubeError {
    KubeError::HookFailed {
        hook_name: hook.name.clone(),
        phase: phase.to_string(),
        message,
    }
}

fn job_condition(job: &Job, kind: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == kind && c.status == "True"))
}

fn job_failed(job: &Job) -> bool {
    job_condition(job, "Failed")
}

/// Condition: the job reached `Complete` or `Failed`
fn job_finished(obj: Option<&Job>) -> bool {
    obj.is_some_and(|job| job_condition(job, "Complete") || job_failed(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};

    fn hook(name: &str, weight: i32, events: &[HookPhase]) -> Hook {
        Hook {
            name: name.to_string(),
            kind: "Job".to_string(),
            path: format!("web/templates/{name}.yaml"),
            manifest: String::new(),
            events: events.to_vec(),
            weight,
            delete_policies: vec![DeletePolicy::BeforeHookCreation],
        }
    }

    fn job_with(kind: &str) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(vec![JobCondition {
                    type_: kind.to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_names() {
        for phase in [HookPhase::PreUpgrade, HookPhase::PostDelete, HookPhase::Test] {
            assert_eq!(phase.as_str().parse::<HookPhase>().unwrap(), phase);
            assert_eq!(
                serde_json::to_string(&phase).unwrap(),
                format!("\"{}\"", phase.as_str())
            );
        }
        assert_eq!("test-success".parse::<HookPhase>().unwrap(), HookPhase::Test);
        assert!("during-upgrade".parse::<HookPhase>().is_err());
    }

    #[test]
    fn test_hooks_for_phase_ordering() {
        let hooks = vec![
            hook("migrate", 5, &[HookPhase::PreUpgrade]),
            hook("backup", -1, &[HookPhase::PreUpgrade, HookPhase::PreDelete]),
            hook("notify", 0, &[HookPhase::PostUpgrade]),
            hook("alpha", 5, &[HookPhase::PreUpgrade]),
        ];

        let names: Vec<&str> = hooks_for_phase(&hooks, HookPhase::PreUpgrade)
            .iter()
            .map(|h| h.name.as_str())
            .collect();
        assert_eq!(names, vec!["backup", "alpha", "migrate"]);

        assert!(hooks_for_phase(&hooks, HookPhase::Test).is_empty());
    }

    #[test]
    fn test_job_conditions() {
        assert!(!job_finished(None));
        assert!(!job_finished(Some(&Job::default())));
        assert!(job_finished(Some(&job_with("Complete"))));
        assert!(job_finished(Some(&job_with("Failed"))));
        assert!(job_failed(&job_with("Failed")));
        assert!(!job_failed(&job_with("Complete")));
    }
}
