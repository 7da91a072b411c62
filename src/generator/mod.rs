//! Content generator abstraction and adapters.
//!
//! The orchestrator depends only on [`ContentGenerator`]. Adapters:
//! - [`CommandGenerator`]: any CLI that reads a prompt on stdin and prints the answer
//! - [`HttpGenerator`]: an OpenAI-compatible chat completions endpoint

mod command;
mod http;
pub mod prompts;

pub use command::CommandGenerator;
pub use http::HttpGenerator;

use async_trait::async_trait;
use refinery_common::{DomainParameters, Enrichment, MetricsRecord, Session};

/// What the generator is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// First artifact for a requirement.
    Generate,
    /// Rewrite the current artifact using defect and metrics feedback.
    Refine,
    /// Final human-readable report.
    Summarize,
    /// Pick factors from the catalogue; the answer is JSON.
    SelectFactors,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Generate => "generate",
            GenerationMode::Refine => "refine",
            GenerationMode::Summarize => "summarize",
            GenerationMode::SelectFactors => "select_factors",
        }
    }
}

/// Everything a generator call may need, copied out of the session.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub mode: GenerationMode,
    pub requirement: String,
    pub current_artifact: Option<String>,
    pub iteration: u32,
    pub defects: Vec<String>,
    pub metrics: Option<MetricsRecord>,
    pub enrichment: Option<Enrichment>,
    pub domain_parameters: DomainParameters,
    /// Catalogue overview, only for [`GenerationMode::SelectFactors`].
    pub catalogue_summary: Option<String>,
}

impl GenerationContext {
    fn base(mode: GenerationMode, requirement: &str) -> Self {
        Self {
            mode,
            requirement: requirement.to_string(),
            current_artifact: None,
            iteration: 0,
            defects: Vec::new(),
            metrics: None,
            enrichment: None,
            domain_parameters: DomainParameters::default(),
            catalogue_summary: None,
        }
    }

    /// Generate or refine, depending on whether the session already holds an artifact.
    pub fn for_session(session: &Session) -> Self {
        let mode = if session.has_artifact && session.current_artifact.is_some() {
            GenerationMode::Refine
        } else {
            GenerationMode::Generate
        };
        Self {
            mode,
            requirement: session.requirement.clone(),
            current_artifact: session.current_artifact.clone(),
            iteration: session.iteration,
            defects: session.defects.clone(),
            metrics: session.metrics,
            enrichment: session.enrichment.clone(),
            domain_parameters: session.domain_parameters.clone(),
            catalogue_summary: None,
        }
    }

    pub fn summarize(session: &Session) -> Self {
        Self {
            mode: GenerationMode::Summarize,
            ..Self::for_session(session)
        }
    }

    pub fn select_factors(requirement: &str, catalogue_summary: String) -> Self {
        Self {
            catalogue_summary: Some(catalogue_summary),
            ..Self::base(GenerationMode::SelectFactors, requirement)
        }
    }
}

/// Produces text for a generation context. Implementations may be slow and fallible.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, ctx: &GenerationContext) -> anyhow::Result<String>;
}
