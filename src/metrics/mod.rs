//! Metrics extraction from backtest output.
//!
//! Two sources are supported:
//! - the engine's textual summary table (`extract_from_report`)
//! - the engine's JSON result file (`extract_from_result_json`)
//!
//! Both are total: malformed input yields a zeroed record, never an error.

mod extractor;
mod result_json;

pub use extractor::{Extraction, extract_from_report};
pub use result_json::extract_from_result_json;
