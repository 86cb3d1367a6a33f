//! Provenance injection
//!
//! Every rendered manifest is stamped with the chart template it came from
//! and the release that produced it. Workloads additionally get the same
//! annotations on their pod template, so the pods they spawn can be traced
//! back to a release revision.
//!
//! Injection is total: a manifest that cannot be decoded as a Kubernetes
//! object, or whose stamped form cannot be encoded again, is returned
//! byte-for-byte. [`ProvenanceInjector::inject_traced`] reports which path
//! was taken.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bosun_core::Values;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PodTemplateSpec, ReplicationController};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

/// Template path (`<chart>/templates/<file>`) the manifest was rendered from
pub const CHART_PATH_ANNOTATION: &str = "bosun.io/chart-path";
/// Namespace of the owning release
pub const NAMESPACE_ANNOTATION: &str = "bosun.io/namespace";
/// Name of the owning release
pub const RELEASE_ANNOTATION: &str = "bosun.io/release";
/// Revision of the owning release
pub const REVISION_ANNOTATION: &str = "bosun.io/revision";

type Annotations = BTreeMap<String, String>;
type StampFn = fn(JsonValue, &Annotations) -> Result<JsonValue, SkipReason>;

static DEFAULT_CODEC: OnceCell<Arc<ResourceCodec>> = OnceCell::new();

/// Inputs for stamping one manifest
#[derive(Debug, Clone, Copy)]
pub struct ProvenanceContext<'a> {
    /// Template path the manifest was rendered from
    pub path: &'a str,

    /// Render values; `Release.Namespace`, `Release.Name` and
    /// `Release.Revision` are read from here when present
    pub values: &'a Values,
}

impl<'a> ProvenanceContext<'a> {
    pub fn new(path: &'a str, values: &'a Values) -> Self {
        Self { path, values }
    }

    /// The annotations to merge, keyed by annotation name
    pub fn annotations(&self) -> Annotations {
        let mut annotations = Annotations::new();
        annotations.insert(CHART_PATH_ANNOTATION.to_string(), self.path.to_string());

        for (key, path) in [
            (NAMESPACE_ANNOTATION, "Release.Namespace"),
            (RELEASE_ANNOTATION, "Release.Name"),
            (REVISION_ANNOTATION, "Release.Revision"),
        ] {
            if let Some(value) = self.values.get(path).and_then(scalar_to_string) {
                annotations.insert(key.to_string(), value);
            }
        }

        annotations
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Why a manifest was passed through unmodified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Not decodable as a Kubernetes object
    Decode(String),
    /// Stamped object could not be encoded again
    Encode(String),
}

/// Which path the injector took
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// Annotations were merged; `workload` is set when the pod template was
    /// stamped as well
    Stamped { workload: bool },
    /// The input was returned unchanged
    Unchanged(SkipReason),
}

/// Result of [`ProvenanceInjector::inject_traced`]
#[derive(Debug, Clone)]
pub struct Injection {
    pub manifest: String,
    pub outcome: InjectionOutcome,
}

/// Workload kinds that carry a pod template
pub trait PodTemplateWorkload {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;
}

impl PodTemplateWorkload for Deployment {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for DaemonSet {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for ReplicaSet {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().and_then(|spec| spec.template.as_mut())
    }
}

impl PodTemplateWorkload for StatefulSet {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for Job {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateWorkload for ReplicationController {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().and_then(|spec| spec.template.as_mut())
    }
}

fn stamp_workload<K>(object: JsonValue, annotations: &Annotations) -> Result<JsonValue, SkipReason>
where
    K: PodTemplateWorkload + Serialize + DeserializeOwned,
{
    let mut workload: K =
        serde_json::from_value(object).map_err(|e| SkipReason::Decode(e.to_string()))?;

    if let Some(template) = workload.pod_template_mut() {
        template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }

    serde_json::to_value(&workload).map_err(|e| SkipReason::Encode(e.to_string()))
}

/// Registry of typed workload handlers keyed by `(apiVersion, kind)`
///
/// Kinds without a handler only get top-level annotations.
#[derive(Debug, Default)]
pub struct ResourceCodec {
    workloads: HashMap<(String, String), StampFn>,
}

impl ResourceCodec {
    /// An empty codec with no workload handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// A codec with handlers for every built-in workload kind
    pub fn with_workloads() -> Self {
        let mut codec = Self::new();
        codec
            .register::<Deployment>()
            .register::<DaemonSet>()
            .register::<ReplicaSet>()
            .register::<StatefulSet>()
            .register::<Job>()
            .register::<ReplicationController>();
        codec
    }

    /// Process-wide codec, built on first use
    pub fn init_default() -> Arc<Self> {
        DEFAULT_CODEC
            .get_or_init(|| Arc::new(Self::with_workloads()))
            .clone()
    }

    /// Register a workload kind whose pod template should be stamped
    pub fn register<K>(&mut self) -> &mut Self
    where
        K: k8s_openapi::Resource + PodTemplateWorkload + Serialize + DeserializeOwned,
    {
        self.workloads.insert(
            (K::API_VERSION.to_string(), K::KIND.to_string()),
            stamp_workload::<K>,
        );
        self
    }

    pub fn is_workload(&self, api_version: &str, kind: &str) -> bool {
        self.handler(api_version, kind).is_some()
    }

    fn handler(&self, api_version: &str, kind: &str) -> Option<StampFn> {
        self.workloads
            .get(&(api_version.to_string(), kind.to_string()))
            .copied()
    }
}

/// Stamps release provenance into rendered manifests
#[derive(Debug, Clone)]
pub struct ProvenanceInjector {
    codec: Arc<ResourceCodec>,
}

impl Default for ProvenanceInjector {
    fn default() -> Self {
        Self::new(ResourceCodec::init_default())
    }
}

impl ProvenanceInjector {
    pub fn new(codec: Arc<ResourceCodec>) -> Self {
        Self { codec }
    }

    /// Stamp one manifest; never fails
    pub fn inject(&self, manifest: &str, ctx: &ProvenanceContext<'_>) -> String {
        self.inject_traced(manifest, ctx).manifest
    }

    /// Stamp one manifest and report what happened
    pub fn inject_traced(&self, manifest: &str, ctx: &ProvenanceContext<'_>) -> Injection {
        match self.try_inject(manifest, ctx) {
            Ok((stamped, workload)) => Injection {
                manifest: stamped,
                outcome: InjectionOutcome::Stamped { workload },
            },
            Err(reason) => {
                tracing::debug!(path = ctx.path, ?reason, "manifest passed through without provenance");
                Injection {
                    manifest: manifest.to_string(),
                    outcome: InjectionOutcome::Unchanged(reason),
                }
            }
        }
    }

    fn try_inject(
        &self,
        manifest: &str,
        ctx: &ProvenanceContext<'_>,
    ) -> Result<(String, bool), SkipReason> {
        let mut object: JsonValue =
            serde_yaml::from_str(manifest).map_err(|e| SkipReason::Decode(e.to_string()))?;
        let (api_version, kind) = resource_identity(&object)?;

        let annotations = ctx.annotations();
        merge_top_level(&mut object, &annotations)?;

        let (object, workload) = match self.codec.handler(&api_version, &kind) {
            Some(stamp) => (stamp(object, &annotations)?, true),
            None => (object, false),
        };

        let encoded =
            serde_yaml::to_string(&object).map_err(|e| SkipReason::Encode(e.to_string()))?;
        Ok((encoded, workload))
    }
}

fn resource_identity(object: &JsonValue) -> Result<(String, String), SkipReason> {
    let field = |name: &str| {
        object
            .get(name)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match (field("apiVersion"), field("kind")) {
        (Some(api_version), Some(kind)) => Ok((api_version, kind)),
        _ => Err(SkipReason::Decode(
            "not a Kubernetes object: apiVersion and kind are required".to_string(),
        )),
    }
}

fn merge_top_level(object: &mut JsonValue, annotations: &Annotations) -> Result<(), SkipReason> {
    let malformed = |what: &str| SkipReason::Decode(format!("{what} is not a mapping"));

    let JsonValue::Object(root) = object else {
        return Err(malformed("document"));
    };

    let metadata = root.entry("metadata").or_insert(JsonValue::Null);
    if metadata.is_null() {
        *metadata = JsonValue::Object(Map::new());
    }
    let JsonValue::Object(metadata) = metadata else {
        return Err(malformed("metadata"));
    };

    let existing = metadata.entry("annotations").or_insert(JsonValue::Null);
    if existing.is_null() {
        *existing = JsonValue::Object(Map::new());
    }
    let JsonValue::Object(existing) = existing else {
        return Err(malformed("metadata.annotations"));
    };

    for (key, value) in annotations {
        existing.insert(key.clone(), JsonValue::String(value.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  annotations:
    team: platform
spec:
  replicas: 2
  selector:
    matchLabels:
      app: web
  template:
    metadata:
      labels:
        app: web
    spec:
      containers:
        - name: web
          image: nginx:1.25
"#;

    fn release_values() -> Values {
        Values::from_yaml(
            r#"
Release:
  Name: frontend
  Namespace: prod
  Revision: 3
"#,
        )
        .unwrap()
    }

    fn parse(manifest: &str) -> JsonValue {
        serde_yaml::from_str(manifest).unwrap()
    }

    fn annotation<'a>(object: &'a JsonValue, pointer: &str, key: &str) -> Option<&'a str> {
        object.pointer(pointer)?.get(key)?.as_str()
    }

    #[test]
    fn test_context_annotations() {
        let values = release_values();
        let ctx = ProvenanceContext::new("web/templates/deploy.yaml", &values);
        let annotations = ctx.annotations();

        assert_eq!(annotations[CHART_PATH_ANNOTATION], "web/templates/deploy.yaml");
        assert_eq!(annotations[NAMESPACE_ANNOTATION], "prod");
        assert_eq!(annotations[RELEASE_ANNOTATION], "frontend");
        assert_eq!(annotations[REVISION_ANNOTATION], "3");
    }

    #[test]
    fn test_missing_release_values_only_stamp_path() {
        let values = Values::new();
        let ctx = ProvenanceContext::new("a/templates/cm.yaml", &values);
        assert_eq!(ctx.annotations().len(), 1);

        let out = ProvenanceInjector::default().inject(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n",
            &ctx,
        );
        let object = parse(&out);
        let annotations = object.pointer("/metadata/annotations").unwrap();
        assert_eq!(annotations.as_object().unwrap().len(), 1);
        assert_eq!(
            annotation(&object, "/metadata/annotations", CHART_PATH_ANNOTATION),
            Some("a/templates/cm.yaml")
        );
    }

    #[test]
    fn test_deployment_pod_template_is_stamped() {
        let values = release_values();
        let ctx = ProvenanceContext::new("web/templates/deploy.yaml", &values);
        let injection = ProvenanceInjector::default().inject_traced(DEPLOYMENT, &ctx);

        assert_eq!(injection.outcome, InjectionOutcome::Stamped { workload: true });
        let object = parse(&injection.manifest);

        for pointer in ["/metadata/annotations", "/spec/template/metadata/annotations"] {
            assert_eq!(annotation(&object, pointer, RELEASE_ANNOTATION), Some("frontend"));
            assert_eq!(annotation(&object, pointer, NAMESPACE_ANNOTATION), Some("prod"));
            assert_eq!(annotation(&object, pointer, REVISION_ANNOTATION), Some("3"));
        }
        // existing annotations survive
        assert_eq!(annotation(&object, "/metadata/annotations", "team"), Some("platform"));
        assert_eq!(object.pointer("/spec/replicas").unwrap(), 2);
    }

    #[test]
    fn test_existing_provenance_is_overwritten() {
        let values = release_values();
        let ctx = ProvenanceContext::new("p", &values);
        let manifest = "apiVersion: v1\nkind: Service\nmetadata:\n  name: s\n  annotations:\n    bosun.io/revision: \"1\"\n";

        let object = parse(&ProvenanceInjector::default().inject(manifest, &ctx));
        assert_eq!(annotation(&object, "/metadata/annotations", REVISION_ANNOTATION), Some("3"));
    }

    #[test]
    fn test_all_workload_kinds_stamp_pod_template() {
        let pod = "template:\n    metadata:\n      labels:\n        app: x\n    spec:\n      containers:\n        - name: x\n          image: busybox\n";
        let selector = "selector:\n    matchLabels:\n      app: x\n  ";
        let manifests = [
            format!("apiVersion: apps/v1\nkind: DaemonSet\nmetadata:\n  name: x\nspec:\n  {selector}{pod}"),
            format!("apiVersion: apps/v1\nkind: ReplicaSet\nmetadata:\n  name: x\nspec:\n  {selector}{pod}"),
            format!("apiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: x\nspec:\n  serviceName: x\n  {selector}{pod}"),
            format!("apiVersion: batch/v1\nkind: Job\nmetadata:\n  name: x\nspec:\n  {pod}"),
            format!("apiVersion: v1\nkind: ReplicationController\nmetadata:\n  name: x\nspec:\n  {pod}"),
        ];

        let values = release_values();
        let ctx = ProvenanceContext::new("x/templates/x.yaml", &values);
        let injector = ProvenanceInjector::default();

        for manifest in &manifests {
            let injection = injector.inject_traced(manifest, &ctx);
            assert_eq!(
                injection.outcome,
                InjectionOutcome::Stamped { workload: true },
                "{manifest}"
            );
            let object = parse(&injection.manifest);
            assert_eq!(
                annotation(&object, "/spec/template/metadata/annotations", RELEASE_ANNOTATION),
                Some("frontend"),
                "{manifest}"
            );
        }
    }

    #[test]
    fn test_unknown_kind_gets_top_level_only() {
        let manifest = r#"apiVersion: example.com/v1
kind: Widget
metadata:
  name: w
spec:
  template:
    metadata:
      labels:
        a: b
"#;
        let values = release_values();
        let ctx = ProvenanceContext::new("w/templates/widget.yaml", &values);
        let injection = ProvenanceInjector::default().inject_traced(manifest, &ctx);

        assert_eq!(injection.outcome, InjectionOutcome::Stamped { workload: false });
        let object = parse(&injection.manifest);
        assert_eq!(annotation(&object, "/metadata/annotations", RELEASE_ANNOTATION), Some("frontend"));
        assert!(object.pointer("/spec/template/metadata/annotations").is_none());
    }

    #[test]
    fn test_legacy_api_version_is_not_a_workload() {
        let manifest = DEPLOYMENT.replace("apps/v1", "extensions/v1beta1");
        let values = release_values();
        let ctx = ProvenanceContext::new("p", &values);
        let injection = ProvenanceInjector::default().inject_traced(&manifest, &ctx);

        assert_eq!(injection.outcome, InjectionOutcome::Stamped { workload: false });
        let object = parse(&injection.manifest);
        assert!(annotation(&object, "/spec/template/metadata/annotations", RELEASE_ANNOTATION).is_none());
    }

    #[test]
    fn test_undecodable_manifest_is_returned_verbatim() {
        let values = release_values();
        let ctx = ProvenanceContext::new("p", &values);
        let injector = ProvenanceInjector::default();

        for manifest in [
            "this: is: not: yaml: [",
            "just a string",
            "# only a comment\n",
            "kind: Service\nmetadata: {}\n",
            "apiVersion: v1\nkind: Service\nmetadata: [a, b]\n",
            "apiVersion: v1\nkind: Service\nmetadata:\n  annotations: nope\n",
        ] {
            let injection = injector.inject_traced(manifest, &ctx);
            assert_eq!(injection.manifest, manifest);
            assert!(matches!(
                injection.outcome,
                InjectionOutcome::Unchanged(SkipReason::Decode(_))
            ));
        }
    }

    #[test]
    fn test_invalid_workload_body_is_returned_verbatim() {
        let manifest = DEPLOYMENT.replace("replicas: 2", "replicas: two");
        let values = release_values();
        let ctx = ProvenanceContext::new("p", &values);

        let injection = ProvenanceInjector::default().inject_traced(&manifest, &ctx);
        assert_eq!(injection.manifest, manifest);
        assert!(matches!(injection.outcome, InjectionOutcome::Unchanged(_)));
    }

    #[test]
    fn test_injection_is_idempotent() {
        let values = release_values();
        let ctx = ProvenanceContext::new("web/templates/deploy.yaml", &values);
        let injector = ProvenanceInjector::default();

        let once = injector.inject(DEPLOYMENT, &ctx);
        let twice = injector.inject(&once, &ctx);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fresh_codec_without_handlers() {
        let codec = Arc::new(ResourceCodec::new());
        assert!(!codec.is_workload("apps/v1", "Deployment"));

        let values = release_values();
        let ctx = ProvenanceContext::new("p", &values);
        let injection = ProvenanceInjector::new(codec).inject_traced(DEPLOYMENT, &ctx);

        assert_eq!(injection.outcome, InjectionOutcome::Stamped { workload: false });
        let object = parse(&injection.manifest);
        assert!(annotation(&object, "/spec/template/metadata/annotations", RELEASE_ANNOTATION).is_none());
    }

    #[test]
    fn test_default_codec_registrations() {
        let codec = ResourceCodec::init_default();
        for (api_version, kind) in [
            ("apps/v1", "Deployment"),
            ("apps/v1", "DaemonSet"),
            ("apps/v1", "ReplicaSet"),
            ("apps/v1", "StatefulSet"),
            ("batch/v1", "Job"),
            ("v1", "ReplicationController"),
        ] {
            assert!(codec.is_workload(api_version, kind), "{kind}");
        }
        assert!(!codec.is_workload("v1", "ConfigMap"));
        assert!(Arc::ptr_eq(&codec, &ResourceCodec::init_default()));
    }
}
