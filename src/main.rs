mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use futures::StreamExt;

use cli::{Cli, Command};
use scriptorium::config::Config;
use scriptorium::cost::estimate_cost;
use scriptorium::executor::GenerationExecutor;
use scriptorium::generation::AttemptBudget;
use scriptorium::job::{InMemoryJobStore, JobState, JobStatus};
use scriptorium::logging::init_logging;
use scriptorium::progress::ProgressBroadcaster;
use scriptorium::request::GenerationRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(max_retries) = cli.max_retries {
        config.retry.max_retries = max_retries;
    }
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Run { file, json } => run(&config, &file, json).await,
        Command::Stream { file } => stream(&config, &file).await,
        Command::Estimate { file } => estimate(&config, &file),
    }
}

fn build_executor(config: &Config) -> Result<Arc<GenerationExecutor>> {
    if config.api_key.is_empty() {
        bail!("no API key: set ANTHROPIC_API_KEY or api_key in the config file");
    }
    Ok(Arc::new(GenerationExecutor::new(
        config.build_generator()?,
        Arc::new(InMemoryJobStore::new()),
        Arc::new(ProgressBroadcaster::new()),
    )))
}

async fn run(config: &Config, file: &Path, json: bool) -> Result<()> {
    let request = GenerationRequest::load(file)?;
    let executor = build_executor(config)?;

    let mut subscription = executor.subscribe(&request.owner);
    let job_id = executor.start_generation(request).await?;

    let mut progress = ui::GenerationProgress::new();
    while let Some(envelope) = subscription.recv().await {
        if envelope.job_id != job_id {
            continue;
        }
        if json {
            println!("{}", envelope.to_json());
        } else {
            progress.handle(&envelope.event);
        }
        if envelope.is_terminal() {
            break;
        }
    }

    let status = executor.job_status(job_id).await?;
    if json {
        println!("{}", serde_json::to_string(&status)?);
    } else {
        progress.finish(&status);
    }
    ensure_completed(&status)
}

async fn stream(config: &Config, file: &Path) -> Result<()> {
    let request = GenerationRequest::load(file)?;
    let executor = build_executor(config)?;

    let (job_id, mut events) = executor.stream_generation(request).await?;
    while let Some(event) = events.next().await {
        println!("{}", event.to_json());
    }
    ensure_completed(&executor.job_status(job_id).await?)
}

fn estimate(config: &Config, file: &Path) -> Result<()> {
    let request = GenerationRequest::load(file)?;
    let sections = request.effective_sections();
    let estimate = estimate_cost(
        &request.document,
        &sections,
        config.quality.thresholds.max_regenerations,
    );
    let budget = AttemptBudget {
        chain_len: config.fallbacks.chain(&request.document.model).len(),
        ..config.attempt_budget()
    };
    ui::print_estimate(&estimate, &budget);
    Ok(())
}

fn ensure_completed(status: &JobStatus) -> Result<()> {
    match (&status.state, &status.error) {
        (JobState::Completed, _) => Ok(()),
        (_, Some(failure)) => bail!("job {} failed: {failure}", status.id),
        (state, None) => bail!("job {} ended in state {state}", status.id),
    }
}
