//! Layered configuration for refinery.
//!
//! Settings are read from `refinery.toml` (or `--config <path>`), then
//! overridden by environment variables, then by CLI flags.
//!
//! ```toml
//! [loop]
//! max_iterations = 5
//! timerange = "20230101-20230201"
//! state_dir = ".refinery/sessions"
//!
//! [generator]
//! kind = "http"
//! endpoint = "https://api.openai.com/v1/chat/completions"
//! model = "gpt-4-turbo"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [validator]
//! command = "python3"
//! timeout_secs = 30
//!
//! [engine]
//! command = "freqtrade"
//! config_path = "freqtrade_worker/user_data/config.json"
//! timeout_secs = 600
//!
//! [enrichment]
//! search_endpoint = "https://api.tavily.com/search"
//! max_factors = 15
//!
//! [server]
//! port = 8000
//! ```

use crate::validator::DEFAULT_PARSE_SCRIPT;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "refinery.toml";

/// Which content generator adapter to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// A CLI reading the prompt on stdin.
    #[default]
    Command,
    /// An OpenAI-compatible chat completions endpoint.
    Http,
}

impl std::fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorKind::Command => write!(f, "command"),
            GeneratorKind::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for GeneratorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" => Ok(GeneratorKind::Command),
            "http" => Ok(GeneratorKind::Http),
            _ => bail!("Invalid generator kind '{}'. Valid values: command, http", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Historical window for backtests when a request names none.
    #[serde(default = "default_timerange")]
    pub timerange: String,
    /// When set, sessions are kept as JSON files here instead of in memory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_max_iterations() -> u32 {
    5
}

fn default_timerange() -> String {
    crate::orchestrator::DEFAULT_TIMERANGE.to_string()
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timerange: default_timerange(),
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSection {
    #[serde(default)]
    pub kind: GeneratorKind,
    #[serde(default = "default_generator_command")]
    pub command: String,
    #[serde(default = "default_generator_args")]
    pub args: Vec<String>,
    #[serde(default = "default_generator_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_generator_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_generator_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generator_timeout")]
    pub timeout_secs: u64,
}

fn default_generator_command() -> String {
    "claude".to_string()
}

fn default_generator_args() -> Vec<String> {
    vec!["--print".to_string()]
}

fn default_generator_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_generator_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_generator_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_generator_timeout() -> u64 {
    180
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            command: default_generator_command(),
            args: default_generator_args(),
            endpoint: default_generator_endpoint(),
            model: default_generator_model(),
            api_key_env: default_generator_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_generator_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSection {
    #[serde(default = "default_validator_command")]
    pub command: String,
    /// Arguments for the parser. The artifact arrives on stdin.
    #[serde(default = "default_validator_args")]
    pub args: Vec<String>,
    #[serde(default = "default_validator_timeout")]
    pub timeout_secs: u64,
    /// Substrings every artifact must contain.
    #[serde(default = "default_required_symbols")]
    pub required_symbols: Vec<String>,
}

fn default_validator_command() -> String {
    "python3".to_string()
}

fn default_validator_args() -> Vec<String> {
    vec!["-c".to_string(), DEFAULT_PARSE_SCRIPT.to_string()]
}

fn default_validator_timeout() -> u64 {
    30
}

fn default_required_symbols() -> Vec<String> {
    [
        "class AI_Strategy",
        "populate_indicators",
        "populate_entry_trend",
        "populate_exit_trend",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            command: default_validator_command(),
            args: default_validator_args(),
            timeout_secs: default_validator_timeout(),
            required_symbols: default_required_symbols(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_engine_command")]
    pub command: String,
    /// Placed before `backtesting`, e.g. `["compose", "run", "--rm", "freqtrade"]` for docker.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_engine_config")]
    pub config_path: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub keep_attempts: bool,
}

fn default_engine_command() -> String {
    "freqtrade".to_string()
}

fn default_engine_config() -> PathBuf {
    PathBuf::from("freqtrade_worker/user_data/config.json")
}

fn default_data_dir() -> Option<PathBuf> {
    Some(PathBuf::from("freqtrade_worker/user_data/data"))
}

fn default_strategy_name() -> String {
    "AI_Strategy".to_string()
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".refinery/attempts")
}

fn default_engine_timeout() -> u64 {
    600
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: Vec::new(),
            config_path: default_engine_config(),
            data_dir: default_data_dir(),
            strategy_name: default_strategy_name(),
            work_root: default_work_root(),
            timeout_secs: default_engine_timeout(),
            keep_attempts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSection {
    /// Knowledge search is skipped when empty.
    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: Option<String>,
    #[serde(default = "default_search_key_env")]
    pub search_api_key_env: String,
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,
    /// JSON file replacing the built-in factor catalogue.
    #[serde(default)]
    pub catalogue_path: Option<PathBuf>,
    #[serde(default = "default_max_factors")]
    pub max_factors: usize,
}

fn default_search_endpoint() -> Option<String> {
    Some("https://api.tavily.com/search".to_string())
}

fn default_search_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}

fn default_search_timeout() -> u64 {
    20
}

fn default_max_factors() -> usize {
    15
}

impl Default for EnrichmentSection {
    fn default() -> Self {
        Self {
            search_endpoint: default_search_endpoint(),
            search_api_key_env: default_search_key_env(),
            search_timeout_secs: default_search_timeout(),
            catalogue_path: None,
            max_factors: default_max_factors(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: false,
        }
    }
}

/// The parsed `refinery.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "loop")]
    pub run: LoopSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub validator: ValidatorSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub enrichment: EnrichmentSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse refinery.toml")
    }

    /// An explicit path must exist. Without one, `refinery.toml` in the
    /// working directory is used when present, else defaults.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// File, then `.env`, then process environment.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let mut config = Self::load_or_default(explicit)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `REFINERY_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("REFINERY_MAX_ITERATIONS") {
            self.run.max_iterations = v
                .trim()
                .parse()
                .with_context(|| format!("REFINERY_MAX_ITERATIONS is not a number: '{}'", v))?;
        }
        if let Some(v) = lookup("REFINERY_TIMERANGE").filter(|v| !v.trim().is_empty()) {
            self.run.timerange = v.trim().to_string();
        }
        if let Some(v) = lookup("REFINERY_GENERATOR_CMD").filter(|v| !v.trim().is_empty()) {
            self.generator.command = v.trim().to_string();
        }
        if let Some(v) = lookup("REFINERY_ENGINE_CMD").filter(|v| !v.trim().is_empty()) {
            self.engine.command = v.trim().to_string();
        }
        if let Some(v) = lookup("REFINERY_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            self.run.state_dir = Some(PathBuf::from(v.trim()));
        }
        Ok(())
    }

    pub fn generator_api_key(&self) -> Option<String> {
        read_key(&self.generator.api_key_env)
    }

    pub fn search_api_key(&self) -> Option<String> {
        read_key(&self.enrichment.search_api_key_env)
    }

    pub fn search_endpoint(&self) -> Option<&str> {
        self.enrichment
            .search_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator.timeout_secs)
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_secs(self.validator.timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.timeout_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.enrichment.search_timeout_secs)
    }

    /// Errors that make the configuration unusable.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.run.max_iterations == 0 {
            bail!("loop.max_iterations must be at least 1");
        }
        if self.engine.strategy_name.trim().is_empty() {
            bail!("engine.strategy_name must not be empty");
        }
        Ok(())
    }

    /// Non-fatal problems worth telling the user about.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.run.max_iterations == 0 {
            warnings.push("loop.max_iterations is 0; every run would be rejected".to_string());
        }
        if !is_valid_timerange(&self.run.timerange) {
            warnings.push(format!(
                "Invalid loop.timerange '{}': expected YYYYMMDD-YYYYMMDD",
                self.run.timerange
            ));
        }
        if self.generator.kind == GeneratorKind::Http && self.generator_api_key().is_none() {
            warnings.push(format!(
                "generator.kind is http but ${} is not set",
                self.generator.api_key_env
            ));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            warnings.push(format!(
                "generator.temperature {} is outside 0.0..=2.0",
                self.generator.temperature
            ));
        }
        if !self.engine.config_path.exists() {
            warnings.push(format!(
                "engine.config_path {} does not exist; every backtest will fail",
                self.engine.config_path.display()
            ));
        }
        if self.search_endpoint().is_some() && self.search_api_key().is_none() {
            warnings.push(format!(
                "${} is not set; knowledge search will return placeholders",
                self.enrichment.search_api_key_env
            ));
        }
        if let Some(path) = &self.enrichment.catalogue_path
            && !path.exists()
        {
            warnings.push(format!("enrichment.catalogue_path {} does not exist", path.display()));
        }
        if self.enrichment.max_factors == 0 {
            warnings.push("enrichment.max_factors is 0; at least one factor is always selected".to_string());
        }

        warnings
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn read_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// `YYYYMMDD-YYYYMMDD`, either side may be empty (open range).
fn is_valid_timerange(range: &str) -> bool {
    let Some((start, end)) = range.split_once('-') else {
        return false;
    };
    let side_ok = |s: &str| s.is_empty() || (s.len() == 8 && s.chars().all(|c| c.is_ascii_digit()));
    side_ok(start) && side_ok(end) && !(start.is_empty() && end.is_empty())
}
