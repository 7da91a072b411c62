use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized performance figures for one backtest run.
///
/// Every field defaults to zero. A record is always fully populated, so
/// callers never need to distinguish "missing" from "zero".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsRecord {
    pub total_trades: u64,
    pub profit_total_pct: f64,
    pub profit_total_abs: f64,
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub win_rate_pct: f64,
}

impl MetricsRecord {
    /// Clamp every field into its documented range.
    ///
    /// Non-finite values become zero, drawdown is made non-negative and the
    /// win rate is clamped to `[0, 100]`.
    pub fn normalized(mut self) -> Self {
        fn finite(v: f64) -> f64 {
            if v.is_finite() { v } else { 0.0 }
        }
        self.profit_total_pct = finite(self.profit_total_pct);
        self.profit_total_abs = finite(self.profit_total_abs);
        self.max_drawdown_pct = finite(self.max_drawdown_pct).abs();
        self.sharpe = finite(self.sharpe);
        self.sortino = finite(self.sortino);
        self.win_rate_pct = finite(self.win_rate_pct).clamp(0.0, 100.0);
        self
    }

    /// True when no field carries information.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for MetricsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- Total trades: {}", self.total_trades)?;
        writeln!(f, "- Total profit: {:.2}% ({:.2} abs)", self.profit_total_pct, self.profit_total_abs)?;
        writeln!(f, "- Max drawdown: {:.2}%", self.max_drawdown_pct)?;
        writeln!(f, "- Sharpe: {:.2}", self.sharpe)?;
        writeln!(f, "- Sortino: {:.2}", self.sortino)?;
        write!(f, "- Win rate: {:.2}%", self.win_rate_pct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_all_zero() {
        let m = MetricsRecord::default();
        assert!(m.is_zero());
        assert_eq!(m.total_trades, 0);
        assert_eq!(m.win_rate_pct, 0.0);
    }

    #[test]
    fn normalized_clamps_ranges() {
        let m = MetricsRecord {
            max_drawdown_pct: -12.5,
            win_rate_pct: 140.0,
            sharpe: f64::NAN,
            profit_total_pct: f64::INFINITY,
            ..Default::default()
        }
        .normalized();
        assert_eq!(m.max_drawdown_pct, 12.5);
        assert_eq!(m.win_rate_pct, 100.0);
        assert_eq!(m.sharpe, 0.0);
        assert_eq!(m.profit_total_pct, 0.0);
    }

    #[test]
    fn serializes_camel_case_and_tolerates_missing_fields() {
        let json = serde_json::to_value(MetricsRecord {
            total_trades: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["totalTrades"], 3);
        assert!(json.get("profitTotalPct").is_some());

        let parsed: MetricsRecord = serde_json::from_str(r#"{"totalTrades": 7}"#).unwrap();
        assert_eq!(parsed.total_trades, 7);
        assert_eq!(parsed.sortino, 0.0);
    }

    #[test]
    fn display_lists_every_field() {
        let text = MetricsRecord {
            total_trades: 50,
            profit_total_pct: 5.0,
            ..Default::default()
        }
        .to_string();
        assert!(text.contains("Total trades: 50"));
        assert!(text.contains("5.00%"));
        assert!(text.contains("Win rate"));
    }
}
