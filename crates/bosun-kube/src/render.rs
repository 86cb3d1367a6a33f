//! Chart rendering into hooks, a manifest document and notes

use bosun_core::{Capabilities, Chart, ReleaseOptions, Values, to_render_values};
use bosun_engine::Engine;
use tracing::debug;

use crate::error::Result;
use crate::hooks::Hook;
use crate::manifest::{ManifestDocument, sort_manifests};

/// Output of rendering a chart for one revision
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub hooks: Vec<Hook>,
    pub manifest: ManifestDocument,
    pub notes: Option<String>,
}

/// Renders a chart into release resources
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        chart: &Chart,
        config: &Values,
        options: &ReleaseOptions,
        caps: &Capabilities,
    ) -> Result<Rendered>;
}

/// Renderer backed by the MiniJinja template engine
#[derive(Debug, Clone, Default)]
pub struct EngineRenderer {
    engine: Engine,
}

impl EngineRenderer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

impl Renderer for EngineRenderer {
    fn render(
        &self,
        chart: &Chart,
        config: &Values,
        options: &ReleaseOptions,
        caps: &Capabilities,
    ) -> Result<Rendered> {
        let values = to_render_values(chart, config, options, caps);
        let result = self.engine.render(chart, &values)?;
        let (hooks, manifest) = sort_manifests(&result.manifests, caps)?;

        debug!(
            chart = %chart.full_name(),
            revision = options.revision,
            resources = manifest.len(),
            hooks = hooks.len(),
            "rendered chart"
        );

        Ok(Rendered {
            hooks,
            manifest,
            notes: result.notes.filter(|n| !n.trim().is_empty()),
        })
    }
}
