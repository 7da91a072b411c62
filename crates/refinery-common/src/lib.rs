//! Shared domain types for the refinery orchestrator.
//!
//! Everything here is plain serializable data: the persisted [`Session`],
//! the normalized [`MetricsRecord`], the per-stage progress [`StageEvent`]
//! and the request/response shapes used by the HTTP and WebSocket surfaces.

pub mod events;
pub mod metrics;
pub mod request;
pub mod session;

pub use events::{Stage, StageEvent, StreamMessage, StructuredError};
pub use metrics::MetricsRecord;
pub use request::{DomainParameters, SubmitRequest};
pub use session::{Enrichment, FinalSession, Session};
