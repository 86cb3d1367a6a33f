//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template '{template}' failed to render: {message}")]
    Template {
        template: String,
        line: Option<usize>,
        message: String,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Wrap a MiniJinja error raised while loading or rendering `template`
    pub fn from_minijinja(err: &minijinja::Error, template: &str) -> Self {
        Self::Template {
            template: template.to_string(),
            line: err.line(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
