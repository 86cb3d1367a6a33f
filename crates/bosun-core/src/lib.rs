//! Bosun Core - Core types shared by the Bosun release engine
//!
//! This crate provides the foundational types used throughout Bosun:
//! - `Chart`: The packaged application (metadata, templates, default values)
//! - `Values`: Configuration values with deep merge support
//! - `ReleaseOptions` / `Capabilities`: Template rendering inputs

pub mod chart;
pub mod context;
pub mod error;
pub mod values;

pub use chart::{Chart, ChartMetadata, Template};
pub use context::{Capabilities, KubeVersion, ReleaseOptions, to_render_values};
pub use error::{CoreError, Result};
pub use values::Values;
