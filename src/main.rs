use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt};
use serde_json::json;
use tokio::time::timeout;

use fraud_checker::{
    config,
    infrastructure::{directories, logging, shutdown},
    tasks::scheduler::configure_sweep_job,
    AnalysisError, AnalysisRequest, FraudChecker,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "fraud-checker", version, about = "Scores URLs, screenshots, emails and text for fraud")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and analyze a web page.
    Url { url: String },
    /// Analyze an image (.png .jpg .jpeg .webp .bmp) or an .eml file.
    File { path: PathBuf },
    /// Analyze pasted text.
    Text { text: String },
    /// Analyze one input per line: URLs, file paths or plain text.
    Batch {
        path: PathBuf,
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config, &paths)?;

    let (shutdown, _) = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let checker = Arc::new(FraudChecker::from_config(&config)?);

    match cli.command {
        Command::Url { url } => run_single(&checker, &shutdown, AnalysisRequest::url(url)).await,
        Command::Text { text } => run_single(&checker, &shutdown, AnalysisRequest::text(text)).await,
        Command::File { path } => {
            let request = request_from_file(&path).await?;
            run_single(&checker, &shutdown, request).await
        }
        Command::Batch { path, concurrency } => {
            let mut scheduler =
                configure_sweep_job(&config.cache.sweep_cron, checker.cache().clone()).await?;
            let outcome = run_batch(checker, &shutdown, &path, concurrency.max(1)).await;

            match timeout(SHUTDOWN_TIMEOUT, scheduler.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(target: "scheduler", ?err, "scheduler shutdown failed"),
                Err(_) => tracing::warn!(
                    target: "scheduler",
                    "scheduler did not stop within {:?}",
                    SHUTDOWN_TIMEOUT
                ),
            }
            outcome
        }
    }
}

async fn run_single(
    checker: &FraudChecker,
    shutdown: &shutdown::Shutdown,
    request: AnalysisRequest,
) -> Result<()> {
    let mut listener = shutdown.subscribe();
    let result = checker.analyze_until(&request, &mut listener).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_batch(
    checker: Arc<FraudChecker>,
    shutdown: &shutdown::Shutdown,
    path: &Path,
    concurrency: usize,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let lines: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    tracing::info!(target: "pipeline", total = lines.len(), concurrency, "batch started");

    let mut results = stream::iter(lines)
        .map(|line| {
            let checker = Arc::clone(&checker);
            let mut listener = shutdown.subscribe();
            async move {
                let outcome = match request_for_line(&line).await {
                    Ok(request) => checker
                        .analyze_until(&request, &mut listener)
                        .await
                        .map_err(anyhow::Error::from),
                    Err(err) => Err(err),
                };
                (line, outcome)
            }
        })
        .buffer_unordered(concurrency);

    let (mut analyzed, mut failed) = (0usize, 0usize);
    while let Some((line, outcome)) = results.next().await {
        match outcome {
            Ok(result) => {
                analyzed += 1;
                println!("{}", json!({ "input": line, "result": result }));
            }
            Err(err) if matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::Cancelled)) => {
                failed += 1;
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(target: "pipeline", input = %line, error = %err, "batch input rejected");
                println!("{}", json!({ "input": line, "error": err.to_string() }));
            }
        }
    }

    tracing::info!(target: "pipeline", analyzed, failed, "batch finished");
    if shutdown.is_triggered() {
        bail!("batch interrupted by shutdown");
    }
    Ok(())
}

/// `http(s)://…` is a URL, an existing path is a file, anything else is text.
async fn request_for_line(line: &str) -> Result<AnalysisRequest> {
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(AnalysisRequest::url(line));
    }
    let path = Path::new(line);
    if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) {
        return request_from_file(path).await;
    }
    Ok(AnalysisRequest::text(line))
}

async fn request_from_file(path: &Path) -> Result<AnalysisRequest> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    Ok(AnalysisRequest::from_upload(file_name, bytes)?)
}
