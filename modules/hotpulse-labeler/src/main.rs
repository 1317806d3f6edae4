use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::{ChatAgent, OpenAi};
use hotpulse_core::{AppConfig, HotpulseError};
use hotpulse_labeler::summarizer::Phase;
use hotpulse_labeler::{Pipeline, RetryingClient, RunLog};

#[derive(Parser)]
#[command(name = "hotpulse", about = "Batch labeling and keyword summary pipeline for harvested posts")]
#[command(version)]
struct Cli {
    /// Path to config TOML file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate the post file by id
    Dedup,

    /// Write the batch request JSONL for every deduplicated post
    Batch,

    /// Join downloaded batch results back to the posts
    Reconcile,

    /// Expand JSON labels of a labeled table into columns
    Expand {
        /// Labeled table to expand (defaults to the reconcile output)
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Label a random sample of posts with interactive calls
    SpotCheck,

    /// Map-reduce keyword summary into a knowledge artifact
    Summarize,

    /// Inject the knowledge artifact into the labeling prompt
    InjectContext {
        /// Text to inject (defaults to the knowledge artifact)
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Dedup => "dedup",
            Commands::Batch => "batch",
            Commands::Reconcile => "reconcile",
            Commands::Expand { .. } => "expand",
            Commands::SpotCheck => "spot-check",
            Commands::Summarize => "summarize",
            Commands::InjectContext { .. } => "inject-context",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hotpulse=info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

/// Configuration-class errors exit 1. Anything else that aborted the run
/// (unreadable input, unwritable output) exits 2.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<HotpulseError>() {
        Some(e) if e.is_config() => 1,
        _ => 2,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = AppConfig::from_env();
    let pipeline = Pipeline::load(cli.config.as_deref()).context("loading configuration")?;
    let data_dir = pipeline.data_dir();
    let mut log = RunLog::new(cli.command.name());

    info!(command = cli.command.name(), run_id = log.run_id.as_str(), "hotpulse starting");

    match &cli.command {
        Commands::Dedup => {
            let stats = pipeline.dedup(&mut log)?;
            println!("{stats}");
            log.save(&data_dir, &stats)?;
        }
        Commands::Batch => {
            let stats = pipeline.batch(&app.model, &mut log)?;
            println!("{stats}");
            log.save(&data_dir, &stats)?;
        }
        Commands::Reconcile => {
            let stats = pipeline.reconcile(&mut log)?;
            println!("{stats}");
            log.save(&data_dir, &stats)?;
        }
        Commands::Expand { input } => {
            let stats = pipeline.expand(input.as_deref(), &mut log)?;
            println!(
                "\nExpanded {} rows ({} with unparseable labels)",
                stats.rows, stats.unparsed
            );
            log.save(&data_dir, &stats)?;
        }
        Commands::SpotCheck => {
            let agent = model_client(&app, &pipeline)?;
            let stats = pipeline.spot_check(agent, &mut log).await?;
            println!("{stats}");
            log.save(&data_dir, &stats)?;
        }
        Commands::Summarize => {
            let agent = model_client(&app, &pipeline)?;
            let outcome = pipeline.summarize(agent, &mut log).await?;
            println!("{}", outcome.stats);
            log.save(&data_dir, &outcome.stats)?;
            if outcome.phase != Phase::Finalized {
                let reason = outcome.failure.as_deref().unwrap_or("unknown");
                warn!(reason, "Summary did not finalize, knowledge artifact not written");
                println!("Knowledge artifact not written: {reason}");
            }
        }
        Commands::InjectContext { source } => {
            let chars = pipeline.inject_context(source.as_deref())?;
            println!("\nInjected {chars} characters of background context");
        }
    }

    Ok(())
}

/// Retrying model client built from env credentials and file limits.
fn model_client(app: &AppConfig, pipeline: &Pipeline) -> Result<Arc<dyn ChatAgent>> {
    let api_key = app.require_api_key()?;
    let openai = OpenAi::new(api_key, &app.model)
        .context("building model client")?
        .with_base_url(&app.base_url);
    Ok(Arc::new(RetryingClient::from_limits(
        Arc::new(openai),
        &pipeline.config().limits,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_exit_one_even_behind_context() {
        let err = anyhow::Error::from(HotpulseError::MissingColumn {
            column: "content".to_string(),
            source_name: "posts.csv".to_string(),
        })
        .context("loading configuration");
        assert_eq!(exit_status(&err), 1);
    }

    #[test]
    fn other_aborts_exit_two() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no results file");
        assert_eq!(exit_status(&anyhow::Error::from(HotpulseError::Io(io))), 2);
        assert_eq!(exit_status(&anyhow::anyhow!("building model client")), 2);
    }
}
