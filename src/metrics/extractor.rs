//! Text-table metrics extraction.
//!
//! The backtest summary is a box-drawn or pipe-delimited table. Layout drifts
//! between engine versions, so parsing is layered:
//! 1. the aggregate `TOTAL` row, read by fixed offsets from the marker cell
//! 2. a sum over per-pair rows when no aggregate row exists
//! 3. labelled lines (drawdown, Sharpe, Sortino, win rate) anywhere in the report
//! 4. a standalone percentage shortly after the aggregate row, for win rate

use crate::util::truncate_chars;
use refinery_common::MetricsRecord;
use regex::Regex;
use std::sync::LazyLock;

static CELL_DELIMITER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[|│┃]").unwrap());

static PAIR_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{2,12}[/\-_][A-Z0-9]{2,12}(?::[A-Z0-9]+)?$").unwrap());

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap());

static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*%").unwrap());

const AGGREGATE_MARKER: &str = "TOTAL";
const TRADES_OFFSET: usize = 1;
const PROFIT_ABS_OFFSET: usize = 3;
const PROFIT_PCT_OFFSET: usize = 4;
const WIN_RATE_WINDOW: usize = 5;
const RAW_EXCERPT_CHARS: usize = 1000;

/// Result of parsing one report.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub metrics: MetricsRecord,
    /// False when no pattern matched at all.
    pub matched: bool,
    /// Truncated raw report, kept only when nothing matched.
    pub raw_excerpt: Option<String>,
}

/// Parse a textual backtest report. Never fails.
pub fn extract_from_report(report: &str) -> Extraction {
    let lines: Vec<&str> = report.lines().collect();
    let mut metrics = MetricsRecord::default();
    let mut matched = false;

    let aggregate = find_aggregate_row(&lines);
    match aggregate {
        Some((line_idx, ref cells, marker_idx)) => {
            matched = true;
            apply_row(&mut metrics, cells, marker_idx);
            if let Some(win) = win_rate_from_row_tail(cells, marker_idx) {
                metrics.win_rate_pct = win;
            }
            tracing::debug!(line = line_idx, "Parsed aggregate row");
        }
        None => {
            let rows = sum_pair_rows(&lines, &mut metrics);
            if rows > 0 {
                matched = true;
                tracing::debug!(rows, "No aggregate row, summed per-pair rows");
            }
        }
    }

    if scan_labelled_lines(&lines, &mut metrics) {
        matched = true;
    }

    if metrics.win_rate_pct == 0.0
        && let Some((line_idx, _, _)) = aggregate
        && let Some(win) = win_rate_after(&lines, line_idx)
    {
        metrics.win_rate_pct = win;
    }

    let raw_excerpt = if matched {
        None
    } else {
        Some(truncate_chars(report.trim(), RAW_EXCERPT_CHARS))
    };

    Extraction {
        metrics: metrics.normalized(),
        matched,
        raw_excerpt,
    }
}

fn split_cells(line: &str) -> Vec<&str> {
    CELL_DELIMITER.split(line).map(str::trim).collect()
}

/// First line with a cell equal to the aggregate marker, with its cells and the marker index.
fn find_aggregate_row<'a>(lines: &[&'a str]) -> Option<(usize, Vec<&'a str>, usize)> {
    lines.iter().enumerate().find_map(|(idx, line)| {
        if !line.contains(AGGREGATE_MARKER) {
            return None;
        }
        let cells = split_cells(line);
        let marker = cells.iter().position(|c| c.eq_ignore_ascii_case(AGGREGATE_MARKER))?;
        Some((idx, cells, marker))
    })
}

fn parse_number(cell: &str) -> Option<f64> {
    let token = NUMBER.find(cell)?.as_str().replace(',', "");
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_count(cell: &str) -> Option<u64> {
    parse_number(cell).filter(|v| *v >= 0.0).map(|v| v.round() as u64)
}

fn cell_at<'a>(cells: &[&'a str], base: usize, offset: usize) -> Option<&'a str> {
    cells.get(base + offset).copied()
}

/// Populate trades and profit from one row. A bad field keeps its zero default.
fn apply_row(metrics: &mut MetricsRecord, cells: &[&str], base: usize) {
    if let Some(trades) = cell_at(cells, base, TRADES_OFFSET).and_then(parse_count) {
        metrics.total_trades = trades;
    }
    if let Some(abs) = cell_at(cells, base, PROFIT_ABS_OFFSET).and_then(parse_number) {
        metrics.profit_total_abs = abs;
    }
    if let Some(pct) = cell_at(cells, base, PROFIT_PCT_OFFSET).and_then(parse_number) {
        metrics.profit_total_pct = pct;
    }
}

/// Sum trades and profit over per-pair rows. Returns the number of rows used.
///
/// Known approximation: percentage profit is summed across pairs rather than
/// weighted by stake, so it overstates multi-pair results.
fn sum_pair_rows(lines: &[&str], metrics: &mut MetricsRecord) -> usize {
    let mut rows = 0;
    for line in lines {
        let cells = split_cells(line);
        let Some(base) = cells.iter().position(|c| !c.is_empty()) else {
            continue;
        };
        if !PAIR_CELL.is_match(cells[base]) {
            continue;
        }
        let mut row = MetricsRecord::default();
        apply_row(&mut row, &cells, base);
        metrics.total_trades += row.total_trades;
        metrics.profit_total_abs += row.profit_total_abs;
        metrics.profit_total_pct += row.profit_total_pct;
        rows += 1;
    }
    rows
}

#[derive(Clone, Copy)]
enum Label {
    Drawdown,
    Sharpe,
    Sortino,
    WinRate,
}

fn classify(line: &str) -> Option<Label> {
    let lower = line.to_lowercase();
    if lower.contains(&AGGREGATE_MARKER.to_lowercase()) {
        return None;
    }
    if lower.contains("sharpe") {
        Some(Label::Sharpe)
    } else if lower.contains("sortino") {
        Some(Label::Sortino)
    } else if lower.contains("win rate") || lower.contains("winrate") {
        Some(Label::WinRate)
    } else if (lower.contains("drawdown") || lower.contains("underwater"))
        && !["duration", "start", "end", "high", "low"].iter().any(|w| lower.contains(w))
    {
        Some(Label::Drawdown)
    } else {
        None
    }
}

fn last_percentage(line: &str) -> Option<f64> {
    PERCENT
        .captures_iter(line)
        .last()
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn last_number(line: &str) -> Option<f64> {
    NUMBER
        .find_iter(line)
        .last()
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
}

/// Fill drawdown and ratio fields from labelled lines. First hit per label wins.
fn scan_labelled_lines(lines: &[&str], metrics: &mut MetricsRecord) -> bool {
    let (mut drawdown, mut sharpe, mut sortino, mut win) = (false, false, false, false);
    for line in lines {
        match classify(line) {
            Some(Label::Drawdown) if !drawdown => {
                if let Some(v) = last_percentage(line).or_else(|| last_number(line)) {
                    metrics.max_drawdown_pct = v.abs();
                    drawdown = true;
                }
            }
            Some(Label::Sharpe) if !sharpe => {
                if let Some(v) = last_number(line) {
                    metrics.sharpe = v;
                    sharpe = true;
                }
            }
            Some(Label::Sortino) if !sortino => {
                if let Some(v) = last_number(line) {
                    metrics.sortino = v;
                    sortino = true;
                }
            }
            Some(Label::WinRate) if !win => {
                if let Some(v) = last_percentage(line).or_else(|| last_number(line)) {
                    metrics.win_rate_pct = v;
                    win = true;
                }
            }
            _ => {}
        }
    }
    drawdown || sharpe || sortino || win
}

/// The trailing "Win Draw Loss Win%" cell of an aggregate row.
fn win_rate_from_row_tail(cells: &[&str], marker: usize) -> Option<f64> {
    cells.iter().skip(marker + PROFIT_PCT_OFFSET + 1).rev().find_map(|cell| {
        let numbers: Vec<f64> = NUMBER
            .find_iter(cell)
            .filter_map(|m| m.as_str().replace(',', "").parse().ok())
            .collect();
        if numbers.len() >= 4 {
            numbers.last().copied().filter(|v| (0.0..=100.0).contains(v))
        } else {
            None
        }
    })
}

fn win_rate_after(lines: &[&str], aggregate_idx: usize) -> Option<f64> {
    lines
        .iter()
        .skip(aggregate_idx + 1)
        .take(WIN_RATE_WINDOW)
        .find_map(|line| last_percentage(line).filter(|v| (0.0..=100.0).contains(v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQTRADE_REPORT: &str = r#"
Result for strategy AI_Strategy
                                            BACKTESTING REPORT
┏━━━━━━━━━━┳━━━━━━━━┳━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━━━━┓
┃     Pair ┃ Trades ┃ Avg Profit % ┃ Tot Profit USDT ┃ Tot Profit % ┃ Avg Duration ┃  Win  Draw  Loss  Win% ┃
┡━━━━━━━━━━╇━━━━━━━━╇━━━━━━━━━━━━━━╇━━━━━━━━━━━━━━━━━╇━━━━━━━━━━━━━━╇━━━━━━━━━━━━━━╇━━━━━━━━━━━━━━━━━━━━━━━━┩
│ BTC/USDT │     30 │         0.35 │          31.500 │         3.15 │      3:10:00 │   18     0    12  60.0 │
│ ETH/USDT │     20 │        -0.10 │          -6.500 │        -0.65 │      2:05:00 │    9     0    11  45.0 │
│    TOTAL │     50 │         0.17 │          25.000 │          2.5 │      2:44:00 │   27     0    23  54.0 │
└──────────┴────────┴──────────────┴─────────────────┴──────────────┴──────────────┴────────────────────────┘
                 SUMMARY METRICS
┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━━━━━━━━┓
┃ Metric                      ┃ Value               ┃
┡━━━━━━━━━━━━━━━━━━━━━━━━━━━━━╇━━━━━━━━━━━━━━━━━━━━━┩
│ Sortino                     │ 2.10                │
│ Sharpe                      │ 1.42                │
│ Drawdown duration           │ 2 days 03:00:00     │
│ Absolute Drawdown (Account) │ 4.37%               │
│ Max % of account underwater │ 4.37%               │
└─────────────────────────────┴─────────────────────┘
"#;

    #[test]
    fn test_minimal_aggregate_row() {
        let out = extract_from_report("TOTAL | 50 | 0.10 | 25.0 | 5.0");
        assert!(out.matched);
        assert_eq!(out.metrics.total_trades, 50);
        assert_eq!(out.metrics.profit_total_abs, 25.0);
        assert_eq!(out.metrics.profit_total_pct, 5.0);
        assert!(out.raw_excerpt.is_none());
    }

    #[test]
    fn test_box_drawn_report() {
        let out = extract_from_report(FREQTRADE_REPORT);
        let m = out.metrics;
        assert_eq!(m.total_trades, 50);
        assert_eq!(m.profit_total_abs, 25.0);
        assert_eq!(m.profit_total_pct, 2.5);
        assert_eq!(m.win_rate_pct, 54.0);
        assert_eq!(m.sharpe, 1.42);
        assert_eq!(m.sortino, 2.10);
        assert_eq!(m.max_drawdown_pct, 4.37);
    }

    #[test]
    fn test_bad_field_keeps_default_and_continues() {
        let out = extract_from_report("| TOTAL | n/a | 0.1 | 12.5 | oops |");
        assert!(out.matched);
        assert_eq!(out.metrics.total_trades, 0);
        assert_eq!(out.metrics.profit_total_abs, 12.5);
        assert_eq!(out.metrics.profit_total_pct, 0.0);
    }

    #[test]
    fn test_short_aggregate_row() {
        let out = extract_from_report("| TOTAL | 7 |");
        assert_eq!(out.metrics.total_trades, 7);
        assert_eq!(out.metrics.profit_total_pct, 0.0);
    }

    #[test]
    fn test_pair_rows_are_summed_without_aggregate() {
        let report = "\
| Pair | Trades | Avg Profit % | Tot Profit USDT | Tot Profit % |
| BTC/USDT | 3 | 0.5 | 10.0 | 1.0 |
| ETH/USDT | 2 | 0.2 | 4.0 | 0.5 |
";
        let out = extract_from_report(report);
        assert!(out.matched);
        assert_eq!(out.metrics.total_trades, 5);
        assert_eq!(out.metrics.profit_total_abs, 14.0);
        // Plain sum, not stake-weighted.
        assert_eq!(out.metrics.profit_total_pct, 1.5);
    }

    #[test]
    fn test_labelled_lines_without_table() {
        let report = "Max Drawdown: -12.5%\nSharpe Ratio: -0.3\nSortino: 0.8\nWin Rate: 41.2%";
        let out = extract_from_report(report);
        assert!(out.matched);
        assert_eq!(out.metrics.max_drawdown_pct, 12.5);
        assert_eq!(out.metrics.sharpe, -0.3);
        assert_eq!(out.metrics.sortino, 0.8);
        assert_eq!(out.metrics.win_rate_pct, 41.2);
        assert_eq!(out.metrics.total_trades, 0);
    }

    #[test]
    fn test_win_rate_window_after_aggregate() {
        let report = "TOTAL | 10 | 0.1 | 5.0 | 1.0\n----\nwins 63.5 %\n";
        let out = extract_from_report(report);
        assert_eq!(out.metrics.win_rate_pct, 63.5);
    }

    #[test]
    fn test_win_rate_window_ignores_out_of_range() {
        let report = "TOTAL | 10 | 0.1 | 5.0 | 1.0\nreturn 250%\n";
        let out = extract_from_report(report);
        assert_eq!(out.metrics.win_rate_pct, 0.0);
    }

    #[test]
    fn test_empty_input_is_all_zero() {
        let out = extract_from_report("");
        assert!(!out.matched);
        assert!(out.metrics.is_zero());
        assert_eq!(out.raw_excerpt.as_deref(), Some(""));
    }

    #[test]
    fn test_random_text_is_all_zero_with_excerpt() {
        let noise: String = "lorem ipsum ∑ ┃ 💥 dolor | sit amet\n".repeat(100);
        let out = extract_from_report(&noise);
        assert!(!out.matched);
        assert!(out.metrics.is_zero());
        let excerpt = out.raw_excerpt.unwrap();
        assert!(excerpt.ends_with("...[truncated]"));
        assert!(excerpt.chars().count() <= RAW_EXCERPT_CHARS + "...[truncated]".len());
    }

    #[test]
    fn test_thousands_separator() {
        let out = extract_from_report("TOTAL | 1,200 | 0.1 | 3,456.5 | 12.0");
        assert_eq!(out.metrics.total_trades, 1200);
        assert_eq!(out.metrics.profit_total_abs, 3456.5);
    }
}
