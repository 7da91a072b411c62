//! Typed error hierarchy for the refinery orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `OrchestratorError` — fatal run failures, surfaced to the caller
//! - `StoreError` — session persistence failures
//! - `EngineError` — execution engine failures, absorbed into a defect

use refinery_common::{Stage, StructuredError};
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a run. Recoverable problems (content defects,
/// execution failures, enrichment failures) never reach this type.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("{stage} collaborator failed: {message}")]
    Collaborator { stage: Stage, message: String },

    #[error("{stage} collaborator timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Session {id} already has a run in progress")]
    AlreadyRunning { id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn collaborator(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            stage,
            message: err.to_string(),
        }
    }

    /// The stage the error was raised in, when it belongs to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            OrchestratorError::Collaborator { stage, .. } | OrchestratorError::Timeout { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError::new(self.to_string(), self.stage())
    }
}

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Invalid session id '{id}'")]
    InvalidId { id: String },

    #[error("Failed to access session file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to (de)serialize session {id}: {source}")]
    Serde {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from one execution engine attempt.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Backtest timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to spawn backtest engine '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backtest exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Engine config file not found at {path}")]
    MissingConfig { path: PathBuf },

    #[error("Failed to prepare attempt directory {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
