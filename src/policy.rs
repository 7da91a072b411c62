//! Refinement policy: the stage machine and the continue/finish decision.
//!
//! Everything here is pure. The orchestrator owns side effects and asks this
//! module which stage comes next.

use refinery_common::{MetricsRecord, Session, Stage};

/// Verdict of the refinement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Finish,
}

/// Decide whether to refine again or stop.
///
/// Defects and missing metrics always ask for another attempt. The iteration
/// budget itself is enforced by [`next_stage`], so a `Continue` with no budget
/// left still ends the run.
pub fn decide(session: &Session, max_iterations: u32) -> Decision {
    if session.has_defects() {
        return Decision::Continue;
    }
    if session.metrics.is_none() {
        return Decision::Continue;
    }
    if session.satisfactory {
        return Decision::Finish;
    }
    if session.iteration >= max_iterations {
        return Decision::Finish;
    }
    Decision::Continue
}

/// Quality bar applied in the evaluate stage.
pub trait SuccessCriterion: Send + Sync {
    fn is_satisfactory(&self, metrics: &MetricsRecord) -> bool;
}

/// Profitable overall with at least one trade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfitableWithTrades;

impl SuccessCriterion for ProfitableWithTrades {
    fn is_satisfactory(&self, metrics: &MetricsRecord) -> bool {
        metrics.profit_total_pct > 0.0 && metrics.total_trades > 0
    }
}

/// Where a `run` starts for the given session.
///
/// A run that was cancelled picks up at the stage it stopped before, so an
/// executed but unevaluated artifact is evaluated rather than regenerated.
pub fn initial_stage(session: &Session, max_iterations: u32) -> Stage {
    if let Some(pending) = session.pending_stage {
        return match pending {
            Stage::Generate if session.iteration >= max_iterations => Stage::Policy,
            stage => stage,
        };
    }
    if session.iteration == 0 && session.enrichment.is_none() {
        Stage::Enrichment
    } else if session.iteration >= max_iterations {
        Stage::Policy
    } else {
        Stage::Generate
    }
}

/// Transition function. `None` means the run is over.
pub fn next_stage(current: Stage, session: &Session, max_iterations: u32) -> Option<Stage> {
    match current {
        Stage::Enrichment => Some(Stage::Generate),
        Stage::Generate => Some(Stage::Validate),
        Stage::Validate if session.has_defects() => Some(Stage::Policy),
        Stage::Validate => Some(Stage::Execute),
        Stage::Execute => Some(Stage::Evaluate),
        Stage::Evaluate => Some(Stage::Policy),
        Stage::Policy => match decide(session, max_iterations) {
            Decision::Continue if session.iteration < max_iterations => Some(Stage::Generate),
            _ => Some(Stage::Report),
        },
        Stage::Report => None,
    }
}
