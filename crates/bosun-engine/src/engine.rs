//! Template engine based on MiniJinja

use bosun_core::{Chart, Values};
use indexmap::IndexMap;
use minijinja::Environment;

use crate::error::{EngineError, Result};
use crate::filters;
use crate::provenance::{ProvenanceContext, ProvenanceInjector};

/// Result of rendering a chart
#[derive(Debug, Default)]
pub struct RenderResult {
    /// Rendered manifests keyed by template path (`<chart>/templates/<file>`),
    /// in chart template order
    pub manifests: IndexMap<String, String>,

    /// Post-install notes (if NOTES.txt exists)
    pub notes: Option<String>,
}

/// Template engine builder
pub struct EngineBuilder {
    injector: ProvenanceInjector,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            injector: ProvenanceInjector::default(),
        }
    }

    /// Use a specific provenance injector instead of the process-wide one
    pub fn injector(mut self, injector: ProvenanceInjector) -> Self {
        self.injector = injector;
        self
    }

    /// Build the engine
    pub fn build(self) -> Engine {
        Engine {
            injector: self.injector,
        }
    }
}

/// The template engine
#[derive(Debug, Clone)]
pub struct Engine {
    injector: ProvenanceInjector,
}

impl Default for Engine {
    fn default() -> Self {
        EngineBuilder::new().build()
    }
}

impl Engine {
    /// Create a builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    fn create_environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        // undefined values are template bugs, never empty strings
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        env.add_filter("toyaml", filters::toyaml);
        env.add_filter("tojson", filters::tojson);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("quote", filters::quote);
        env.add_filter("nindent", filters::nindent);
        env.add_filter("indent", filters::indent);
        env.add_filter("required", filters::required);

        env
    }

    /// Render a single template string against `values`
    pub fn render_string(&self, template: &str, values: &Values, name: &str) -> Result<String> {
        let mut env = self.create_environment();
        env.add_template_owned(name.to_string(), template.to_string())
            .map_err(|e| EngineError::from_minijinja(&e, name))?;

        let tmpl = env
            .get_template(name)
            .map_err(|e| EngineError::from_minijinja(&e, name))?;
        tmpl.render(values.inner())
            .map_err(|e| EngineError::from_minijinja(&e, name))
    }

    /// Render every template of `chart` against the render values
    ///
    /// Templates whose file name starts with `_` are loaded (so they can be
    /// included or imported) but produce no output. `NOTES.txt` is returned
    /// as notes. Every YAML document of every other template is passed
    /// through the provenance injector.
    pub fn render(&self, chart: &Chart, values: &Values) -> Result<RenderResult> {
        let mut env = self.create_environment();

        for template in &chart.templates {
            env.add_template_owned(template.name.clone(), template.data.clone())
                .map_err(|e| EngineError::from_minijinja(&e, &template.name))?;
        }

        let mut result = RenderResult::default();

        for template in &chart.templates {
            let file_name = template.name.rsplit('/').next().unwrap_or(&template.name);
            if file_name.starts_with('_') {
                continue;
            }

            let tmpl = env
                .get_template(&template.name)
                .map_err(|e| EngineError::from_minijinja(&e, &template.name))?;
            let rendered = tmpl
                .render(values.inner())
                .map_err(|e| EngineError::from_minijinja(&e, &template.name))?;

            if file_name.eq_ignore_ascii_case("NOTES.txt") {
                result.notes = Some(rendered);
                continue;
            }

            let path = format!("{}/templates/{}", chart.name(), template.name);
            let ctx = ProvenanceContext::new(&path, values);
            let documents: Vec<String> = split_documents(&rendered)
                .into_iter()
                .map(|doc| self.injector.inject(&doc, &ctx))
                .collect();

            if documents.is_empty() {
                continue;
            }
            result.manifests.insert(path, join_documents(&documents));
        }

        Ok(result)
    }
}

/// Split a multi-document YAML stream into its non-empty documents
///
/// Documents that are empty or only hold comments are dropped.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut documents = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim_end() == "---" {
            push_document(&mut documents, &mut current);
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut documents, &mut current);

    documents
}

fn push_document(documents: &mut Vec<String>, current: &mut String) {
    let has_content = current.lines().any(|line| {
        let trimmed = line.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    });
    if has_content {
        documents.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

fn join_documents(documents: &[String]) -> String {
    documents
        .iter()
        .map(|doc| doc.trim_end())
        .collect::<Vec<_>>()
        .join("\n---\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::{CHART_PATH_ANNOTATION, REVISION_ANNOTATION, ResourceCodec};
    use semver::Version;
    use std::sync::Arc;

    fn render_values(replicas: u32) -> Values {
        Values(serde_json::json!({
            "Values": { "replicas": replicas, "name": "web" },
            "Release": { "Name": "front", "Namespace": "prod", "Revision": 2 },
        }))
    }

    fn chart() -> Chart {
        Chart::new("web", Version::new(1, 0, 0))
            .with_template("_helpers.tpl", "{% macro fullname(release, name) %}{{ release }}-{{ name }}{% endmacro %}")
            .with_template(
                "configmap.yaml",
                r#"{% from "_helpers.tpl" import fullname %}apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ fullname(Release.Name, Values.name) }}
data:
  replicas: {{ Values.replicas | quote }}
"#,
            )
            .with_template("NOTES.txt", "Installed {{ Release.Name }}")
            .with_template("empty.yaml", "{% if false %}kind: Nothing{% endif %}\n")
    }

    #[test]
    fn test_render_chart() {
        let result = Engine::default().render(&chart(), &render_values(3)).unwrap();

        assert_eq!(result.notes.as_deref(), Some("Installed front"));
        assert_eq!(result.manifests.len(), 1);

        let manifest = &result.manifests["web/templates/configmap.yaml"];
        let object: serde_json::Value = serde_yaml::from_str(manifest).unwrap();
        assert_eq!(object.pointer("/metadata/name").unwrap(), "front-web");
        assert_eq!(object.pointer("/data/replicas").unwrap(), "3");

        let annotations = object.pointer("/metadata/annotations").unwrap();
        assert_eq!(annotations[CHART_PATH_ANNOTATION], "web/templates/configmap.yaml");
        assert_eq!(annotations[REVISION_ANNOTATION], "2");
    }

    #[test]
    fn test_undefined_value_is_an_error() {
        let chart = Chart::new("web", Version::new(1, 0, 0))
            .with_template("svc.yaml", "name: {{ Values.missing.deeper }}");

        let err = Engine::default().render(&chart, &render_values(1)).unwrap_err();
        assert!(matches!(err, EngineError::Template { ref template, .. } if template == "svc.yaml"));
    }

    #[test]
    fn test_multi_document_template() {
        let chart = Chart::new("web", Version::new(1, 0, 0)).with_template(
            "all.yaml",
            "apiVersion: v1\nkind: Service\nmetadata:\n  name: a\n---\n# comment only\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: b\n",
        );

        let result = Engine::default().render(&chart, &render_values(1)).unwrap();
        let documents = split_documents(&result.manifests["web/templates/all.yaml"]);
        assert_eq!(documents.len(), 2);
        for doc in documents {
            assert!(doc.contains(CHART_PATH_ANNOTATION));
        }
    }

    #[test]
    fn test_custom_injector() {
        let engine = Engine::builder()
            .injector(ProvenanceInjector::new(Arc::new(ResourceCodec::new())))
            .build();
        let out = engine
            .render_string("{{ Values.replicas }}", &render_values(5), "inline")
            .unwrap();
        assert_eq!(out, "5");
    }

    #[test]
    fn test_split_documents() {
        let docs = split_documents("---\na: 1\n---\n\n---\nb: 2\n--- \nc: 3");
        assert_eq!(docs, vec!["a: 1\n", "b: 2\n", "c: 3\n"]);
    }
}
