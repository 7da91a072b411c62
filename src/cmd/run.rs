//! One in-process refinement cycle — `refinery run`.

use anyhow::{Context, Result, bail};
use clap::Args;
use refinery::config::Config;
use refinery::ui::RunUI;
use refinery_common::{DomainParameters, SubmitRequest};
use tokio::sync::mpsc;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Natural-language strategy requirement (optional with --resume)
    pub requirement: Option<String>,

    /// Iteration budget (overrides [loop].max_iterations)
    #[arg(short, long)]
    pub max_iterations: Option<u32>,

    /// Session id to create or resume
    #[arg(short, long)]
    pub session: Option<String>,

    /// Continue the stored session named by --session
    #[arg(long, requires = "session")]
    pub resume: bool,

    /// Domain parameter, e.g. --param pairs=BTC/USDT,ETH/USDT --param timeframe=5m
    #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

pub(crate) fn parse_params(raw: &[String]) -> Result<DomainParameters> {
    let mut params = DomainParameters::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("Invalid --param '{}': expected KEY=VALUE", item);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid --param '{}': empty key", item);
        }
        params.insert(key, value.trim());
    }
    Ok(params)
}

pub(crate) fn build_request(args: RunArgs) -> Result<SubmitRequest> {
    let requirement = args.requirement.unwrap_or_default();
    if requirement.trim().is_empty() && !args.resume {
        bail!("A requirement is needed unless --resume is given");
    }
    let mut request = SubmitRequest::new(requirement);
    request.max_iterations = args.max_iterations;
    request.session_id = args.session;
    request.is_new_session = !args.resume;
    request.domain_parameters = parse_params(&args.params)?;
    Ok(request)
}

pub async fn cmd_run(config: &Config, args: RunArgs, verbose: bool) -> Result<()> {
    let request = build_request(args)?;
    let orchestrator = super::build_orchestrator(config).await?;

    let max_iterations = request.max_iterations.unwrap_or(config.run.max_iterations);
    let ui = if console::Term::stderr().is_term() {
        RunUI::new(max_iterations, verbose)
    } else {
        RunUI::hidden(max_iterations)
    };

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let cancelled = orchestrator.registry().cancel_all();
                tracing::info!(cancelled, "Interrupted, stopping after the current stage");
            }
        })
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let run = {
        let orchestrator = orchestrator.clone();
        async move { orchestrator.submit(request, Some(&tx)).await }
    };
    let render = async {
        while let Some(event) = rx.recv().await {
            ui.on_event(&event);
        }
    };
    let (result, ()) = tokio::join!(run, render);
    interrupt.abort();

    match result {
        Ok(session) => {
            let projection = session.project();
            ui.finish(&projection);
            let json = serde_json::to_string_pretty(&projection).context("Failed to serialize result")?;
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            ui.fail(&e.to_structured());
            Err(e.into())
        }
    }
}
