use crate::ui::icons::{CHART, CHECK, CROSS, LINT, PENCIL, REPORT, SCALE, SEARCH, STOP, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use refinery_common::{FinalSession, Stage, StageEvent, StructuredError};
use std::time::Duration;

/// Terminal progress for a single `refinery run`, rendered via `indicatif`.
///
/// Two bars are stacked: an iteration bar sized to the iteration budget and a
/// spinner naming the stage that is currently running. Everything draws to
/// stderr so stdout stays free for the JSON result.
pub struct RunUI {
    multi: MultiProgress,
    iteration_bar: ProgressBar,
    stage_bar: ProgressBar,
    verbose: bool,
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░")
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl RunUI {
    pub fn new(max_iterations: u32, verbose: bool) -> Self {
        Self::with_target(max_iterations, verbose, ProgressDrawTarget::stderr())
    }

    /// A UI that renders nothing. Used when stderr is not a terminal.
    pub fn hidden(max_iterations: u32) -> Self {
        Self::with_target(max_iterations, false, ProgressDrawTarget::hidden())
    }

    fn with_target(max_iterations: u32, verbose: bool, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let iteration_bar = multi.add(ProgressBar::new(u64::from(max_iterations)));
        iteration_bar.set_style(bar_style("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}"));
        iteration_bar.set_prefix("Iteration");

        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(spinner_style("{prefix:.bold.dim} {spinner} {msg}"));
        stage_bar.set_prefix("    Stage");
        stage_bar.set_message(stage_activity(Stage::Enrichment));
        stage_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            iteration_bar,
            stage_bar,
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Advance the bars for a completed stage.
    pub fn on_event(&self, event: &StageEvent) {
        self.iteration_bar.set_position(u64::from(event.iteration));
        if let Some(next) = upcoming_stage(event) {
            self.stage_bar.set_message(stage_activity(next));
        }
        if event.stage == Stage::Validate || event.stage == Stage::Execute {
            self.iteration_bar.set_message(match event.has_defects {
                Some(true) => style("defects found").yellow().to_string(),
                _ => style("clean").green().to_string(),
            });
        }
        if self.verbose {
            self.print_line(format!("  {} {}", stage_icon(event.stage), describe_event(event)));
        }
    }

    pub fn finish(&self, session: &FinalSession) {
        self.stage_bar.finish_and_clear();
        self.iteration_bar.finish_and_clear();
        self.print_line(outcome_line(session));
    }

    pub fn fail(&self, error: &StructuredError) {
        self.stage_bar.finish_and_clear();
        self.iteration_bar.abandon();
        let stage = error.stage.map(|s| format!(" during {}", s)).unwrap_or_default();
        self.print_line(format!("{}Run failed{}: {}", CROSS, stage, style(&error.message).red()));
    }
}

fn stage_icon(stage: Stage) -> &'static console::Emoji<'static, 'static> {
    match stage {
        Stage::Enrichment => &SEARCH,
        Stage::Generate => &PENCIL,
        Stage::Validate => &LINT,
        Stage::Execute => &CHART,
        Stage::Evaluate | Stage::Policy => &SCALE,
        Stage::Report => &REPORT,
    }
}

fn stage_activity(stage: Stage) -> String {
    match stage {
        Stage::Enrichment => "gathering research context",
        Stage::Generate => "generating strategy",
        Stage::Validate => "validating artifact",
        Stage::Execute => "running backtest",
        Stage::Evaluate => "evaluating metrics",
        Stage::Policy => "deciding next step",
        Stage::Report => "writing report",
    }
    .to_string()
}

/// Best guess at the stage that follows `event`, for the spinner label only.
fn upcoming_stage(event: &StageEvent) -> Option<Stage> {
    match event.stage {
        Stage::Enrichment => Some(Stage::Generate),
        Stage::Generate => Some(Stage::Validate),
        Stage::Validate if event.has_defects == Some(true) => Some(Stage::Policy),
        Stage::Validate => Some(Stage::Execute),
        Stage::Execute => Some(Stage::Evaluate),
        Stage::Evaluate => Some(Stage::Policy),
        Stage::Policy if event.satisfactory == Some(true) => Some(Stage::Report),
        Stage::Policy => Some(Stage::Generate),
        Stage::Report => None,
    }
}

fn describe_event(event: &StageEvent) -> String {
    let mut line = format!("{} done (iteration {})", event.stage, event.iteration);
    if event.has_defects == Some(true) {
        line.push_str(", defects pending");
    }
    if event.satisfactory == Some(true) {
        line.push_str(", satisfactory");
    }
    line
}

fn outcome_line(session: &FinalSession) -> String {
    if session.cancelled {
        return format!("{}Cancelled after {} iteration(s)", STOP, session.iteration);
    }
    if session.satisfactory {
        let detail = session
            .metrics
            .as_ref()
            .map(|m| format!(" ({} trades, {:.2}% profit)", m.total_trades, m.profit_total_pct))
            .unwrap_or_default();
        return format!(
            "{}Satisfactory strategy after {} iteration(s){}",
            CHECK, session.iteration, detail
        );
    }
    format!(
        "{}Budget exhausted after {} iteration(s), {} defect(s) outstanding",
        WARN,
        session.iteration,
        session.defects.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use refinery_common::MetricsRecord;

    fn event(stage: Stage, has_defects: bool, satisfactory: bool) -> StageEvent {
        StageEvent {
            session_id: "s-1".into(),
            stage,
            iteration: 1,
            satisfactory: Some(satisfactory),
            has_defects: Some(has_defects),
        }
    }

    fn final_session() -> FinalSession {
        FinalSession {
            session_id: "s-1".into(),
            artifact: None,
            satisfactory: false,
            iteration: 3,
            metrics: None,
            defects: vec!["SyntaxError".into()],
            report: None,
            finished: true,
            cancelled: false,
        }
    }

    #[test]
    fn test_upcoming_stage_follows_routing() {
        assert_eq!(upcoming_stage(&event(Stage::Validate, true, false)), Some(Stage::Policy));
        assert_eq!(upcoming_stage(&event(Stage::Validate, false, false)), Some(Stage::Execute));
        assert_eq!(upcoming_stage(&event(Stage::Policy, false, true)), Some(Stage::Report));
        assert_eq!(upcoming_stage(&event(Stage::Policy, true, false)), Some(Stage::Generate));
        assert_eq!(upcoming_stage(&event(Stage::Report, false, true)), None);
    }

    #[test]
    fn test_describe_event() {
        assert_eq!(
            describe_event(&event(Stage::Execute, true, false)),
            "execute done (iteration 1), defects pending"
        );
        assert_eq!(describe_event(&event(Stage::Policy, false, true)), "policy done (iteration 1), satisfactory");
    }

    #[test]
    fn test_outcome_lines() {
        let mut session = final_session();
        assert!(outcome_line(&session).contains("Budget exhausted after 3 iteration(s), 1 defect(s)"));

        session.satisfactory = true;
        session.defects.clear();
        session.metrics = Some(MetricsRecord {
            total_trades: 42,
            profit_total_pct: 12.5,
            ..Default::default()
        });
        assert!(outcome_line(&session).contains("42 trades, 12.50% profit"));

        session.cancelled = true;
        assert!(outcome_line(&session).contains("Cancelled after 3"));
    }

    #[test]
    fn test_hidden_ui_accepts_events() {
        let ui = RunUI::hidden(3);
        ui.on_event(&event(Stage::Generate, false, false));
        assert_eq!(ui.iteration_bar.position(), 1);
        ui.finish(&final_session());
    }
}
