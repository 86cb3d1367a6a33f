//! Chart definition
//!
//! Loading charts from disk or a repository is out of scope; callers hand
//! Bosun an already-assembled [`Chart`].

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// A chart: metadata, raw templates and default values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    pub metadata: ChartMetadata,

    /// Raw template files, relative to the chart's `templates/` directory
    #[serde(default)]
    pub templates: Vec<Template>,

    /// Default values shipped with the chart
    #[serde(default)]
    pub values: Values,
}

/// Chart metadata (Chart.yaml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,

    /// Chart version (semver)
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Version of the packaged application
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Kubernetes version constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A single raw template file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Path relative to `templates/`, e.g. `deployment.yaml`
    pub name: String,

    /// Template source
    pub data: String,
}

impl Template {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

impl Chart {
    /// Create a chart with no templates and empty default values
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            metadata: ChartMetadata {
                name: name.into(),
                version,
                description: None,
                app_version: None,
                kube_version: None,
                keywords: Vec::new(),
                annotations: BTreeMap::new(),
            },
            templates: Vec::new(),
            values: Values::new(),
        }
    }

    /// Parse chart metadata from a Chart.yaml document
    pub fn from_metadata_yaml(yaml: &str) -> Result<Self> {
        let metadata: ChartMetadata = serde_yaml::from_str(yaml)?;
        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart name must not be empty".to_string(),
            });
        }
        Ok(Self {
            metadata,
            templates: Vec::new(),
            values: Values::new(),
        })
    }

    pub fn with_template(mut self, name: impl Into<String>, data: impl Into<String>) -> Self {
        self.templates.push(Template::new(name, data));
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// Name of the chart
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `name-version`, as shown in release listings
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.metadata.name, self.metadata.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_metadata_yaml() {
        let chart = Chart::from_metadata_yaml(
            r#"
name: nginx
version: 1.2.3
appVersion: "1.25"
keywords: [web]
"#,
        )
        .unwrap();

        assert_eq!(chart.name(), "nginx");
        assert_eq!(chart.metadata.version, Version::new(1, 2, 3));
        assert_eq!(chart.metadata.app_version.as_deref(), Some("1.25"));
        assert_eq!(chart.full_name(), "nginx-1.2.3");
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Chart::from_metadata_yaml("name: ''\nversion: 0.1.0").unwrap_err();
        assert!(matches!(err, CoreError::InvalidChart { .. }));
    }

    #[test]
    fn test_invalid_version_rejected() {
        assert!(Chart::from_metadata_yaml("name: a\nversion: latest").is_err());
    }

    #[test]
    fn test_builder() {
        let chart = Chart::new("app", Version::new(0, 1, 0))
            .with_template("svc.yaml", "kind: Service")
            .with_values(Values::from_yaml("port: 80").unwrap());

        assert_eq!(chart.templates.len(), 1);
        assert_eq!(chart.values.get("port").unwrap(), 80);
    }
}
