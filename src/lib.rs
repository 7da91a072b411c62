//! Iterative strategy refinement.
//!
//! A run takes a natural-language trading requirement through research
//! enrichment, code generation, static validation, backtesting and
//! evaluation, feeding defects and metrics back into the next generation
//! until the result is satisfactory or the iteration budget is spent.

pub mod config;
pub mod defects;
pub mod engine;
pub mod enrichment;
pub mod errors;
pub mod generator;
pub mod metrics;
pub mod orchestrator;
pub mod policy;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod ui;
pub mod util;
pub mod validator;
