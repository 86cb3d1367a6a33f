//! Template rendering context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::chart::Chart;
use crate::values::Values;

/// Name reported as `Release.Service` to templates
pub const RELEASE_SERVICE: &str = "Bosun";

/// Release information passed to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOptions {
    pub name: String,
    pub namespace: String,
    pub revision: u32,
    pub time: DateTime<Utc>,
    pub is_upgrade: bool,
    pub is_install: bool,
}

impl ReleaseOptions {
    /// Options for rendering revision `revision` of an upgrade
    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision,
            time: Utc::now(),
            is_upgrade: true,
            is_install: false,
        }
    }

    /// Options for rendering the first revision
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            time: Utc::now(),
            is_upgrade: false,
            is_install: true,
        }
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version
    pub kube_version: KubeVersion,

    /// Available API versions (`v1`, `apps/v1`, ...)
    pub api_versions: Vec<String>,
}

impl Capabilities {
    pub fn new(kube_version: KubeVersion, api_versions: Vec<String>) -> Self {
        Self {
            kube_version,
            api_versions,
        }
    }

    /// Whether `api_version` is served by the cluster
    ///
    /// An empty version set means "unknown" and accepts everything.
    pub fn supports(&self, api_version: &str) -> bool {
        self.api_versions.is_empty() || self.api_versions.iter().any(|v| v == api_version)
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self {
            version: "v1.31.0".to_string(),
            major: "1".to_string(),
            minor: "31".to_string(),
        }
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let parts: Vec<&str> = version.split('.').collect();

        Self {
            version: format!("v{}", version),
            major: parts.first().unwrap_or(&"1").to_string(),
            minor: parts.get(1).unwrap_or(&"31").to_string(),
        }
    }
}

/// Build the value tree templates are rendered against
///
/// Shape:
/// ```yaml
/// Values: <chart defaults merged with config>
/// Release: { Name, Namespace, Revision, Time, IsUpgrade, IsInstall, Service }
/// Chart: { Name, Version, AppVersion, Description }
/// Capabilities: { KubeVersion, ApiVersions }
/// ```
pub fn to_render_values(
    chart: &Chart,
    config: &Values,
    options: &ReleaseOptions,
    caps: &Capabilities,
) -> Values {
    let values = Values::merged(&chart.values, config);

    Values(json!({
        "Values": values.into_inner(),
        "Release": {
            "Name": options.name,
            "Namespace": options.namespace,
            "Revision": options.revision,
            "Time": options.time.to_rfc3339(),
            "IsUpgrade": options.is_upgrade,
            "IsInstall": options.is_install,
            "Service": RELEASE_SERVICE,
        },
        "Chart": {
            "Name": chart.metadata.name,
            "Version": chart.metadata.version.to_string(),
            "AppVersion": chart.metadata.app_version.clone().map_or(JsonValue::Null, JsonValue::String),
            "Description": chart.metadata.description.clone().map_or(JsonValue::Null, JsonValue::String),
        },
        "Capabilities": {
            "KubeVersion": {
                "Version": caps.kube_version.version,
                "Major": caps.kube_version.major,
                "Minor": caps.kube_version.minor,
            },
            "ApiVersions": caps.api_versions,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    #[test]
    fn test_render_values_shape() {
        let chart = Chart::new("web", Version::new(1, 0, 0))
            .with_values(Values::from_yaml("replicas: 1\nimage: nginx").unwrap());
        let config = Values::from_yaml("replicas: 3").unwrap();
        let options = ReleaseOptions::for_upgrade("front", "prod", 4);
        let caps = Capabilities::new(KubeVersion::new("1.30.2"), vec!["v1".to_string()]);

        let values = to_render_values(&chart, &config, &options, &caps);

        assert_eq!(values.get("Values.replicas").unwrap(), 3);
        assert_eq!(values.get("Values.image").unwrap(), "nginx");
        assert_eq!(values.get("Release.Name").unwrap(), "front");
        assert_eq!(values.get("Release.Namespace").unwrap(), "prod");
        assert_eq!(values.get("Release.Revision").unwrap(), 4);
        assert_eq!(values.get("Release.IsUpgrade").unwrap(), true);
        assert_eq!(values.get("Release.Service").unwrap(), "Bosun");
        assert_eq!(values.get("Chart.Version").unwrap(), "1.0.0");
        assert_eq!(values.get("Capabilities.KubeVersion.Minor").unwrap(), "30");
    }

    #[test]
    fn test_capabilities_supports() {
        let open = Capabilities::default();
        assert!(open.supports("anything/v9"));

        let caps = Capabilities::new(KubeVersion::default(), vec!["apps/v1".into()]);
        assert!(caps.supports("apps/v1"));
        assert!(!caps.supports("extensions/v1beta1"));
    }

    #[test]
    fn test_kube_version_parse() {
        let v = KubeVersion::new("v1.29.4");
        assert_eq!(v.version, "v1.29.4");
        assert_eq!(v.major, "1");
        assert_eq!(v.minor, "29");
    }
}
