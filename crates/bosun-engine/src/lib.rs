//! Bosun Engine - Jinja2 templating for Kubernetes releases
//!
//! This crate provides:
//! - A MiniJinja-based template engine with Kubernetes-friendly filters
//! - The provenance injector, which stamps release identity into every
//!   rendered resource (and into workload pod templates)

pub mod engine;
pub mod error;
pub mod filters;
pub mod provenance;

pub use engine::{Engine, EngineBuilder, RenderResult, split_documents};
pub use error::{EngineError, Result};
pub use provenance::{
    InjectionOutcome, ProvenanceContext, ProvenanceInjector, ResourceCodec, SkipReason,
};
