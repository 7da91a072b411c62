//! Prompt templates for each generation mode.

use super::{GenerationContext, GenerationMode};
use refinery_common::DomainParameters;

/// A rendered prompt. Chat adapters send the two parts as separate messages;
/// command adapters concatenate them.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

const STRATEGY_RULES: &str = "\
## Rules
1. The strategy class must be named `AI_Strategy` and inherit from `IStrategy`.
2. Implement `populate_indicators`, `populate_entry_trend` and `populate_exit_trend`.
3. Compute every indicator inside `populate_indicators` with pandas and talib.
4. Use the `enter_long` / `exit_long` columns, not `buy` / `sell`.
5. Set sensible `minimal_roi` and `stoploss` defaults (e.g. roi 0.04, stoploss -0.10) unless asked otherwise.
6. Do not import deprecated APIs: no `numpy.NaN`, no `pandas_ta`, no `calculate_max_drawdown`, no unused imports.
7. Output only Python code. No markdown, no explanation.";

const GENERATE_SYSTEM: &str = "You are a quantitative strategy developer fluent in Python and the Freqtrade framework. \
Write one complete Freqtrade strategy file for the user's requirement.";

const REFINE_SYSTEM: &str = "You are a quantitative strategy optimizer. You receive an existing Freqtrade strategy \
and the feedback from its last validation or backtest. Fix every error first; if it ran, improve \
profitability and drawdown. Rewrite the complete file.";

const SUMMARIZE_SYSTEM: &str = "You are a quantitative trading analyst. Write a concise markdown report for the \
strategy below with these sections: Overview (core logic and indicators), Suitable conditions \
(market regime, instruments, timeframe), Caveats (main risks, key parameters), and Backtest summary \
(interpretation of the metrics, strengths and weaknesses). Base every statement on the code and data.";

const SELECT_SYSTEM: &str = "You are a quantitative factor selection expert. Choose 5-15 factors from the catalogue \
that best fit the user's strategy requirement. Prefer factors the requirement names explicitly, \
cover complementary categories, and respect the requested timeframe. Names must match the catalogue exactly.\n\n\
Answer with JSON only:\n{\"selected_factors\": [\"NAME\", ...], \"reasoning\": \"why these factors fit\"}";

fn render_parameters(params: &DomainParameters) -> String {
    if params.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n## Domain parameters\n");
    for (key, value) in params.iter() {
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out.push_str(&format!("- {}: {}\n", key, rendered));
    }
    out
}

fn render_feedback(ctx: &GenerationContext) -> String {
    let mut feedback = String::new();
    if !ctx.defects.is_empty() {
        feedback.push_str("Errors encountered:\n");
        for defect in &ctx.defects {
            feedback.push_str(defect);
            feedback.push('\n');
        }
    }
    if let Some(metrics) = &ctx.metrics {
        feedback.push_str("Backtest metrics:\n");
        feedback.push_str(&metrics.to_string());
        feedback.push('\n');
    }
    if feedback.is_empty() {
        feedback.push_str("No feedback was recorded for the previous attempt.\n");
    }
    feedback
}

pub fn render(ctx: &GenerationContext) -> Prompt {
    match ctx.mode {
        GenerationMode::Generate => {
            let mut user = format!("## Requirement\n{}\n", ctx.requirement);
            user.push_str(&render_parameters(&ctx.domain_parameters));
            if let Some(enrichment) = &ctx.enrichment {
                user.push_str(&format!("\n## Research notes\n{}\n", enrichment.knowledge));
                user.push_str(&format!("\n## Recommended factors\n{}\n", enrichment.factors));
                user.push_str(
                    "\nPrefer the recommended factors, compute each on its stated timeframe, \
                     and gate entries on the regime each factor needs.\n",
                );
            }
            Prompt {
                system: format!("{}\n\n{}", GENERATE_SYSTEM, STRATEGY_RULES),
                user,
            }
        }
        GenerationMode::Refine => {
            let mut user = format!(
                "## Current state\n- Iteration: {}\n- Requirement: {}\n",
                ctx.iteration, ctx.requirement
            );
            user.push_str(&render_parameters(&ctx.domain_parameters));
            user.push_str(&format!("\n## Feedback\n{}", render_feedback(ctx)));
            user.push_str(&format!(
                "\n## Current code\n{}\n",
                ctx.current_artifact.as_deref().unwrap_or("")
            ));
            Prompt {
                system: format!("{}\n\n{}", REFINE_SYSTEM, STRATEGY_RULES),
                user,
            }
        }
        GenerationMode::Summarize => {
            let metrics = ctx
                .metrics
                .map(|m| m.to_string())
                .unwrap_or_else(|| "No backtest metrics are available.".to_string());
            let mut user = format!(
                "## Requirement\n{}\n\n## Strategy code\n{}\n\n## Backtest results\n{}\n",
                ctx.requirement,
                ctx.current_artifact.as_deref().unwrap_or(""),
                metrics
            );
            if !ctx.defects.is_empty() {
                user.push_str(&format!("\n## Outstanding errors\n{}\n", ctx.defects.join("\n")));
            }
            Prompt {
                system: SUMMARIZE_SYSTEM.to_string(),
                user,
            }
        }
        GenerationMode::SelectFactors => Prompt {
            system: SELECT_SYSTEM.to_string(),
            user: format!(
                "## Requirement\n{}\n\n## Catalogue\n{}\n",
                ctx.requirement,
                ctx.catalogue_summary.as_deref().unwrap_or("")
            ),
        },
    }
}
