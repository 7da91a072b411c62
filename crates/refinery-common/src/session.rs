use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Stage;
use crate::metrics::MetricsRecord;
use crate::request::DomainParameters;

/// Cached output of the two enrichment resolvers. Computed at most once per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    /// Condensed prose from the knowledge search, or a placeholder when it failed.
    pub knowledge: String,
    /// Rendered factor selection.
    pub factors: String,
}

/// The unit of work and persistence for one refinement attempt.
///
/// Mutators keep the invariants in one place: `iteration` only grows,
/// `satisfactory` is never set while defects are outstanding, and an empty
/// defect list means "no known issues".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub requirement: String,
    #[serde(default)]
    pub current_artifact: Option<String>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub defects: Vec<String>,
    #[serde(default)]
    pub metrics: Option<MetricsRecord>,
    #[serde(default)]
    pub satisfactory: bool,
    #[serde(default)]
    pub enrichment: Option<Enrichment>,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub has_artifact: bool,
    #[serde(default)]
    pub domain_parameters: DomainParameters,
    /// Truncated raw engine output kept when no metrics could be recovered from it.
    #[serde(default)]
    pub raw_report_excerpt: Option<String>,
    /// Set once the refinement policy reached a terminal verdict.
    #[serde(default)]
    pub finished: bool,
    /// Set when the last run stopped on a cancellation request.
    #[serde(default)]
    pub cancelled: bool,
    /// Stage a cancelled run was about to enter. A resumed run starts here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, requirement: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            requirement: requirement.into(),
            current_artifact: None,
            iteration: 0,
            defects: Vec::new(),
            metrics: None,
            satisfactory: false,
            enrichment: None,
            report: None,
            has_artifact: false,
            domain_parameters: DomainParameters::default(),
            raw_report_excerpt: None,
            finished: false,
            cancelled: false,
            pending_stage: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A session with a freshly generated v4 UUID.
    pub fn with_generated_id(requirement: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), requirement)
    }

    pub fn with_parameters(mut self, params: DomainParameters) -> Self {
        self.domain_parameters = params;
        self
    }

    /// Store a new artifact. Counts as exactly one generation attempt.
    pub fn record_artifact(&mut self, artifact: String) {
        self.current_artifact = Some(artifact);
        self.has_artifact = true;
        self.iteration += 1;
        self.satisfactory = false;
        self.touch();
    }

    /// Replace the defect log with the outcome of the latest attempt.
    ///
    /// An empty list clears the log. Any defect revokes `satisfactory`.
    pub fn record_defects(&mut self, defects: Vec<String>) {
        if !defects.is_empty() {
            self.satisfactory = false;
        }
        self.defects = defects;
        self.touch();
    }

    pub fn record_metrics(&mut self, metrics: MetricsRecord, raw_excerpt: Option<String>) {
        self.metrics = Some(metrics);
        self.raw_report_excerpt = raw_excerpt;
        self.touch();
    }

    pub fn clear_metrics(&mut self) {
        self.metrics = None;
        self.raw_report_excerpt = None;
        self.satisfactory = false;
        self.touch();
    }

    /// Set the evaluation verdict. Refuses `true` while defects are outstanding.
    pub fn mark_satisfactory(&mut self, verdict: bool) {
        self.satisfactory = verdict && self.defects.is_empty();
        self.touch();
    }

    pub fn has_defects(&self) -> bool {
        !self.defects.is_empty()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// The caller-facing projection of this session.
    pub fn project(&self) -> FinalSession {
        FinalSession {
            session_id: self.id.clone(),
            artifact: self.current_artifact.clone(),
            satisfactory: self.satisfactory,
            iteration: self.iteration,
            metrics: self.metrics,
            defects: self.defects.clone(),
            report: self.report.clone(),
            finished: self.finished,
            cancelled: self.cancelled,
        }
    }
}

/// What a caller receives at the end of a run (and from status polling).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalSession {
    pub session_id: String,
    pub artifact: Option<String>,
    pub satisfactory: bool,
    pub iteration: u32,
    pub metrics: Option<MetricsRecord>,
    pub defects: Vec<String>,
    pub report: Option<String>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_empty() {
        let s = Session::new("s-1", "RSI mean-reversion");
        assert_eq!(s.iteration, 0);
        assert!(!s.has_artifact);
        assert!(s.current_artifact.is_none());
        assert!(s.defects.is_empty());
        assert!(!s.satisfactory);
        assert!(!s.finished);
    }

    #[test]
    fn record_artifact_increments_iteration_once() {
        let mut s = Session::new("s-1", "req");
        s.record_artifact("code".into());
        assert_eq!(s.iteration, 1);
        assert!(s.has_artifact);
        s.record_artifact("code v2".into());
        assert_eq!(s.iteration, 2);
        assert_eq!(s.current_artifact.as_deref(), Some("code v2"));
    }

    #[test]
    fn satisfactory_requires_no_defects() {
        let mut s = Session::new("s-1", "req");
        s.record_defects(vec!["SyntaxError: bad".into()]);
        s.mark_satisfactory(true);
        assert!(!s.satisfactory);

        s.record_defects(Vec::new());
        s.mark_satisfactory(true);
        assert!(s.satisfactory);

        s.record_defects(vec!["ExecutionError: boom".into()]);
        assert!(!s.satisfactory, "new defects revoke satisfactory");
    }

    #[test]
    fn clear_metrics_drops_excerpt() {
        let mut s = Session::new("s-1", "req");
        s.record_metrics(MetricsRecord::default(), Some("raw".into()));
        assert!(s.metrics.is_some());
        s.clear_metrics();
        assert!(s.metrics.is_none());
        assert!(s.raw_report_excerpt.is_none());
    }

    #[test]
    fn projection_uses_camel_case() {
        let mut s = Session::new("s-9", "req");
        s.record_artifact("code".into());
        let json = serde_json::to_value(s.project()).unwrap();
        assert_eq!(json["sessionId"], "s-9");
        assert_eq!(json["iteration"], 1);
        assert_eq!(json["artifact"], "code");
        assert!(json["defects"].as_array().unwrap().is_empty());
    }

    #[test]
    fn pending_stage_is_optional_in_json() {
        let mut s = Session::new("s-2", "req");
        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("pendingStage").is_none());

        s.pending_stage = Some(Stage::Evaluate);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["pendingStage"], "evaluate");
        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back.pending_stage, Some(Stage::Evaluate));
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut s = Session::with_generated_id("req");
        s.enrichment = Some(Enrichment {
            knowledge: "k".into(),
            factors: "f".into(),
        });
        let text = serde_json::to_string(&s).unwrap();
        let back: Session = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
