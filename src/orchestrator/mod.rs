//! The refinement orchestrator.
//!
//! Owns the fixed stage sequence, calls the collaborators, persists the
//! session after every stage and reports progress to an optional observer.
//! Routing decisions live in [`crate::policy`].

mod registry;
mod runner;
#[cfg(test)]
pub(crate) mod testing;

pub use registry::{RunGuard, RunRegistry};

use crate::engine::ExecutionEngine;
use crate::enrichment::EnrichmentResolvers;
use crate::errors::OrchestratorError;
use crate::generator::ContentGenerator;
use crate::policy::SuccessCriterion;
use crate::store::{SessionStore, validate_session_id};
use crate::validator::StaticValidator;
use refinery_common::{Session, StageEvent, SubmitRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_TIMERANGE: &str = "20230101-20230201";

/// The external capabilities a run depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn ContentGenerator>,
    pub validator: Arc<dyn StaticValidator>,
    pub engine: Arc<dyn ExecutionEngine>,
    pub enrichment: Arc<EnrichmentResolvers>,
    pub store: Arc<dyn SessionStore>,
    pub criterion: Arc<dyn SuccessCriterion>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_max_iterations: u32,
    /// Historical window used when a request does not name one.
    pub timerange: String,
    /// Deadline for generate and report calls.
    pub generator_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_max_iterations: 5,
            timerange: DEFAULT_TIMERANGE.to_string(),
            generator_timeout: Duration::from_secs(180),
        }
    }
}

pub type StageObserver = mpsc::UnboundedSender<StageEvent>;

pub struct Orchestrator {
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    registry: RunRegistry,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            collaborators,
            settings,
            registry: RunRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.collaborators.store
    }

    pub fn enrichment(&self) -> &EnrichmentResolvers {
        &self.collaborators.enrichment
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Request cancellation of a running session. False when nothing is running.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.registry.cancel(session_id)
    }

    /// Claim the request's session id for a run, assigning a fresh id when it has none.
    ///
    /// Once claimed, [`Orchestrator::cancel`] reaches the run even before it starts.
    pub fn claim(&self, request: &mut SubmitRequest) -> Result<RunGuard, OrchestratorError> {
        let id = match &request.session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.clone()
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                request.session_id = Some(id.clone());
                request.is_new_session = true;
                id
            }
        };
        self.registry.register(&id)
    }

    /// Create or resume a session for `request` and run it to a terminal state.
    ///
    /// Resuming an unknown id starts a fresh session under that id.
    pub async fn submit(
        &self,
        mut request: SubmitRequest,
        observer: Option<&StageObserver>,
    ) -> Result<Session, OrchestratorError> {
        let guard = self.claim(&mut request)?;
        self.submit_claimed(request, guard, observer).await
    }

    /// [`Orchestrator::submit`] for a request whose id was already claimed.
    pub async fn submit_claimed(
        &self,
        request: SubmitRequest,
        guard: RunGuard,
        observer: Option<&StageObserver>,
    ) -> Result<Session, OrchestratorError> {
        let max_iterations = request
            .max_iterations
            .unwrap_or(self.settings.default_max_iterations);
        if max_iterations == 0 {
            return Err(OrchestratorError::InvalidRequest(
                "maxIterations must be at least 1".into(),
            ));
        }

        let session = self.load_or_create(guard.id(), request).await?;
        self.run(session, max_iterations, observer, guard.token()).await
    }

    async fn load_or_create(
        &self,
        id: &str,
        request: SubmitRequest,
    ) -> Result<Session, OrchestratorError> {
        let store = &self.collaborators.store;
        if request.is_resume() {
            if let Some(mut stored) = store.get(id).await? {
                tracing::info!(session_id = %id, iteration = stored.iteration, "Resuming session");
                if !request.domain_parameters.is_empty() {
                    stored.domain_parameters = request.domain_parameters;
                }
                return Ok(stored);
            }
            tracing::info!(session_id = %id, "No stored session to resume, starting fresh");
        }

        if request.requirement.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("requirement is empty".into()));
        }
        let session = Session::new(id, request.requirement.trim())
            .with_parameters(request.domain_parameters);
        store.create(&session).await?;
        tracing::info!(session_id = %id, "Created session");
        Ok(session)
    }
}
