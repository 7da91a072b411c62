//! Metrics from the engine's JSON result file.

use refinery_common::MetricsRecord;
use serde_json::Value;

fn number(stats: &Value, key: &str) -> Option<f64> {
    stats.get(key)?.as_f64().filter(|v| v.is_finite())
}

/// Read `strategy.<name>` stats from a backtest result document.
///
/// Returns `None` when the document has no entry for the strategy. Individual
/// missing fields stay at zero.
pub fn extract_from_result_json(doc: &Value, strategy: &str) -> Option<MetricsRecord> {
    let stats = doc.get("strategy")?.get(strategy)?;
    if !stats.is_object() {
        return None;
    }

    let total_trades = stats.get("total_trades").and_then(Value::as_u64).unwrap_or(0);

    let profit_total_pct = number(stats, "profit_total_pct")
        .or_else(|| number(stats, "profit_total").map(|ratio| ratio * 100.0))
        .unwrap_or(0.0);

    let max_drawdown_pct = number(stats, "max_drawdown_account")
        .map(|ratio| ratio * 100.0)
        .or_else(|| number(stats, "max_drawdown_pct"))
        .unwrap_or(0.0);

    let win_rate_pct = number(stats, "winrate")
        .map(|ratio| ratio * 100.0)
        .or_else(|| {
            let wins = number(stats, "wins")?;
            (total_trades > 0).then(|| wins / total_trades as f64 * 100.0)
        })
        .unwrap_or(0.0);

    let record = MetricsRecord {
        total_trades,
        profit_total_pct,
        profit_total_abs: number(stats, "profit_total_abs").unwrap_or(0.0),
        max_drawdown_pct,
        sharpe: number(stats, "sharpe").unwrap_or(0.0),
        sortino: number(stats, "sortino").unwrap_or(0.0),
        win_rate_pct,
    };
    Some(record.normalized())
}
