//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `run`     | `Run`            |
//! | `serve`   | `Serve`          |
//! | `status`  | `Status`         |
//! | `factors` | `Factors`        |
//! | `config`  | `Config`         |

pub mod config;
pub mod factors;
pub mod run;
pub mod serve;
pub mod status;

pub use config::cmd_config;
pub use factors::cmd_factors;
pub use run::cmd_run;
pub use serve::cmd_serve;
pub use status::cmd_status;

use anyhow::Result;
use refinery::config::{Config, GeneratorKind};
use refinery::engine::{BacktestEngine, BacktestSettings};
use refinery::enrichment::{
    EnrichmentResolvers, FactorCatalogue, FactorSelector, HttpKnowledgeSearch, KnowledgeSearch,
};
use refinery::generator::{CommandGenerator, ContentGenerator, HttpGenerator};
use refinery::orchestrator::{Collaborators, Orchestrator, OrchestratorSettings};
use refinery::policy::ProfitableWithTrades;
use refinery::store::{FileStore, MemoryStore, SessionStore};
use refinery::validator::ScriptValidator;
use std::sync::Arc;

pub(crate) fn load_catalogue(config: &Config) -> Result<FactorCatalogue> {
    match &config.enrichment.catalogue_path {
        Some(path) => FactorCatalogue::from_json_file(path),
        None => Ok(FactorCatalogue::default()),
    }
}

fn build_generator(config: &Config) -> Result<Arc<dyn ContentGenerator>> {
    let section = &config.generator;
    let generator: Arc<dyn ContentGenerator> = match section.kind {
        GeneratorKind::Command => Arc::new(CommandGenerator::new(
            section.command.clone(),
            section.args.clone(),
            config.generator_timeout(),
        )),
        GeneratorKind::Http => Arc::new(HttpGenerator::new(
            section.endpoint.clone(),
            section.model.clone(),
            config.generator_api_key(),
            section.temperature,
            config.generator_timeout(),
        )?),
    };
    Ok(generator)
}

/// Wire every collaborator from configuration.
pub(crate) async fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    config.ensure_valid()?;

    let generator = build_generator(config)?;

    let validator = Arc::new(ScriptValidator::new(
        config.validator.command.clone(),
        config.validator.args.clone(),
        config.validator.required_symbols.clone(),
        config.validator_timeout(),
    ));

    let engine = Arc::new(BacktestEngine::new(BacktestSettings {
        program: config.engine.command.clone(),
        leading_args: config.engine.args.clone(),
        config_path: config.engine.config_path.clone(),
        data_dir: config.engine.data_dir.clone(),
        strategy_name: config.engine.strategy_name.clone(),
        work_root: config.engine.work_root.clone(),
        timeout: config.engine_timeout(),
        keep_attempts: config.engine.keep_attempts,
    }));

    let search: Option<Arc<dyn KnowledgeSearch>> = match config.search_endpoint() {
        Some(endpoint) => Some(Arc::new(HttpKnowledgeSearch::new(endpoint, config.search_api_key())?)),
        None => None,
    };
    let selector = FactorSelector::new(
        Arc::new(load_catalogue(config)?),
        Some(generator.clone()),
        config.enrichment.max_factors,
        config.generator_timeout(),
    );
    let enrichment = Arc::new(EnrichmentResolvers::new(search, selector, config.search_timeout()));

    let store: Arc<dyn SessionStore> = match &config.run.state_dir {
        Some(dir) => Arc::new(FileStore::new(dir.clone())),
        None => Arc::new(MemoryStore::new()),
    };
    store.init().await?;

    tracing::debug!(
        generator = %config.generator.kind,
        engine = %config.engine.command,
        persistent = config.run.state_dir.is_some(),
        "Collaborators ready"
    );

    let collaborators = Collaborators {
        generator,
        validator,
        engine,
        enrichment,
        store,
        criterion: Arc::new(ProfitableWithTrades),
    };
    let settings = OrchestratorSettings {
        default_max_iterations: config.run.max_iterations,
        timerange: config.run.timerange.clone(),
        generator_timeout: config.generator_timeout(),
    };
    Ok(Arc::new(Orchestrator::new(collaborators, settings)))
}
