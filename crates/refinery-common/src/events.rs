use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::{FinalSession, Session};

/// One named step of the orchestrator's fixed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Enrichment,
    Generate,
    Validate,
    Execute,
    Evaluate,
    Policy,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Enrichment => "enrichment",
            Stage::Generate => "generate",
            Stage::Validate => "validate",
            Stage::Execute => "execute",
            Stage::Evaluate => "evaluate",
            Stage::Policy => "policy",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event emitted after every completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageEvent {
    pub session_id: String,
    pub stage: Stage,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub satisfactory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_defects: Option<bool>,
}

impl StageEvent {
    pub fn after(stage: Stage, session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            stage,
            iteration: session.iteration,
            satisfactory: Some(session.satisfactory),
            has_defects: Some(session.has_defects()),
        }
    }
}

/// The single wire representation of a fatal run error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub message: String,
    pub stage: Option<Stage>,
}

impl StructuredError {
    pub fn new(message: impl Into<String>, stage: Option<Stage>) -> Self {
        Self {
            message: message.into(),
            stage,
        }
    }
}

/// Frames sent to a streaming observer: one `step` per stage, then exactly one
/// `complete` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Step(StageEvent),
    Complete(FinalSession),
    Error(StructuredError),
}

impl StreamMessage {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamMessage::Step(_))
    }
}
