//! Scripted collaborators shared by orchestrator and server tests.

use super::{Collaborators, Orchestrator, OrchestratorSettings};
use crate::defects::Defect;
use crate::engine::{ExecutionEngine, ExecutionReport, ExecutionRequest};
use crate::enrichment::{EnrichmentResolvers, FactorCatalogue, FactorSelector, KnowledgeSearch};
use crate::errors::EngineError;
use crate::generator::{ContentGenerator, GenerationContext, GenerationMode};
use crate::policy::ProfitableWithTrades;
use crate::store::MemoryStore;
use crate::validator::StaticValidator;
use async_trait::async_trait;
use refinery_common::SubmitRequest;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) const VALID: &str = "```python\nclass AI_Strategy:\n    pass\n```";
pub(crate) const INVALID: &str = "class AI_Strategy(:\n    INVALID";
pub(crate) const PASSING_REPORT: &str = "TOTAL | 50 | 0.10 | 25.0 | 5.0";
pub(crate) const LOSING_REPORT: &str = "TOTAL | 12 | -0.40 | -30.0 | -3.0";

pub(crate) type GenFn = dyn Fn(&GenerationContext) -> anyhow::Result<String> + Send + Sync;

pub(crate) struct FnGenerator {
    pub(crate) f: Box<GenFn>,
    pub(crate) modes: Mutex<Vec<GenerationMode>>,
}

impl FnGenerator {
    pub(crate) fn new(f: impl Fn(&GenerationContext) -> anyhow::Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            f: Box::new(f),
            modes: Mutex::new(Vec::new()),
        })
    }

    /// Returns `artifact` for generation and a fixed report for summaries.
    pub(crate) fn fixed(artifact: &'static str) -> Arc<Self> {
        Self::new(move |ctx| match ctx.mode {
            GenerationMode::Summarize => Ok("final report".into()),
            _ => Ok(artifact.into()),
        })
    }

    pub(crate) fn modes(&self) -> Vec<GenerationMode> {
        self.modes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FnGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> anyhow::Result<String> {
        self.modes.lock().unwrap().push(ctx.mode);
        (self.f)(ctx)
    }
}

/// Rejects anything containing "INVALID".
pub(crate) struct MarkerValidator;

#[async_trait]
impl StaticValidator for MarkerValidator {
    async fn validate(&self, artifact: &str) -> anyhow::Result<Vec<Defect>> {
        if artifact.contains("INVALID") {
            Ok(vec![Defect::syntax("invalid syntax (line 1)")])
        } else {
            Ok(Vec::new())
        }
    }
}

pub(crate) type EngineFn = dyn Fn(usize, &ExecutionRequest) -> Result<ExecutionReport, EngineError> + Send + Sync;

pub(crate) struct FnEngine {
    pub(crate) f: Box<EngineFn>,
    pub(crate) calls: AtomicUsize,
    pub(crate) requests: Mutex<Vec<ExecutionRequest>>,
}

impl FnEngine {
    pub(crate) fn new(
        f: impl Fn(usize, &ExecutionRequest) -> Result<ExecutionReport, EngineError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            f: Box::new(f),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn printing(report: &'static str) -> Arc<Self> {
        Self::new(move |_, _| Ok(stdout(report)))
    }
}

pub(crate) fn stdout(text: &str) -> ExecutionReport {
    ExecutionReport {
        stdout: text.to_string(),
        structured: None,
    }
}

#[async_trait]
impl ExecutionEngine for FnEngine {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport, EngineError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.f)(n, request)
    }
}

#[derive(Default)]
pub(crate) struct CountingSearch {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl KnowledgeSearch for CountingSearch {
    async fn search(&self, _query: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("RSI below 30 signals oversold conditions.".into())
    }
}

pub(crate) struct Harness {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) search: Arc<CountingSearch>,
}

pub(crate) fn harness(generator: Arc<FnGenerator>, engine: Arc<FnEngine>) -> Harness {
    harness_with_timeout(generator, engine, Duration::from_secs(5))
}

pub(crate) fn harness_with_timeout(
    generator: Arc<FnGenerator>,
    engine: Arc<FnEngine>,
    generator_timeout: Duration,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let search = Arc::new(CountingSearch::default());
    let enrichment = EnrichmentResolvers::new(
        Some(search.clone()),
        FactorSelector::new(Arc::new(FactorCatalogue::default()), None, 15, Duration::from_secs(1)),
        Duration::from_secs(1),
    );
    let orchestrator = Orchestrator::new(
        Collaborators {
            generator,
            validator: Arc::new(MarkerValidator),
            engine,
            enrichment: Arc::new(enrichment),
            store: store.clone(),
            criterion: Arc::new(ProfitableWithTrades),
        },
        OrchestratorSettings {
            generator_timeout,
            ..OrchestratorSettings::default()
        },
    );
    Harness {
        orchestrator,
        store,
        search,
    }
}

pub(crate) fn request(max_iterations: u32) -> SubmitRequest {
    SubmitRequest {
        max_iterations: Some(max_iterations),
        ..SubmitRequest::new("RSI mean-reversion")
    }
}
