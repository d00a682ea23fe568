#![allow(clippy::result_large_err)]

use clap::Parser;
use miette::Diagnostic;
use miette::Result;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::outputter::OutPutter;
use crate::parser::DEFAULT_PLAN;
use crate::parser::DEFAULT_PLAN_NAME;
use crate::parser::ProbePlan;
use crate::runner::ProbeEvent;
use crate::runner::run_probes;
use crate::validator::ValidatedPlan;
use crate::validator::ValidationError;
use crate::validator::Validator;

mod cli;
mod interpreter;
mod outputter;
mod parser;
mod runner;
mod validator;

#[derive(Error, Debug, Diagnostic)]
pub enum ProbeError {
    #[error("Failed to read probe plan {0}")]
    FileError(String, #[source] std::io::Error),

    #[error("Failed to parse probe plan")]
    TomlParsing(#[from] toml::de::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ValidationError(#[from] ValidationError),
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "backend_probe=debug"
    } else {
        "backend_probe=warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Reads the probe plan (the built-in one unless `--path` is given), parses
/// it and validates it, applying the `--base-url` override.
fn load_and_validate_plan(cli: &Cli) -> Result<(String, ValidatedPlan), ProbeError> {
    let (name, contents) = match &cli.path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ProbeError::FileError(path.clone(), e))?;
            (path.clone(), contents)
        }
        None => (DEFAULT_PLAN_NAME.to_string(), DEFAULT_PLAN.to_string()),
    };

    let plan: ProbePlan = toml::from_str(&contents).map_err(ProbeError::TomlParsing)?;

    let validated = Validator::new(&plan, &contents, &name)
        .with_base_url(cli.base_url.clone())
        .validate()
        .map_err(ProbeError::ValidationError)?;

    Ok((name, validated))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (plan_name, plan) = load_and_validate_plan(&cli)?;
    debug!(plan = %plan_name, base_url = %plan.base_url, "probe plan loaded");

    let n_probes = plan.probes.len();
    let base_url = plan.base_url.clone();

    // The runner is the only producer, so the outputter sees events in
    // probe order.
    let (runner_tx, outputter_rx) = flume::unbounded::<ProbeEvent>();

    let outputter_handle = tokio::spawn(async move {
        OutPutter::start(outputter_rx, &plan_name, &base_url, n_probes).await;
    });

    let runner_handle = tokio::spawn(async move { run_probes(plan, runner_tx).await });

    let (runner_result, _) = futures::join!(runner_handle, outputter_handle);

    // Probe outcomes never fail the run; only a broken pipeline does.
    match runner_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "probe run aborted"),
        Err(err) => tracing::error!(error = %err, "probe runner task failed"),
    }

    Ok(())
}
