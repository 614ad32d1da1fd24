//! ka-runner daemon
//!
//! MCP server that runs Khan Academy live-editor programs in headless Chrome.
//! Configuration comes from `--config`, or JSON in `KA_RUNNER_CONFIG`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ka_runner_daemon::backend::ChromiumBackend;
use ka_runner_daemon::config::Config;
use ka_runner_daemon::mcp;
use ka_runner_daemon::pipeline::Runner;
use ka_runner_daemon::request::{ExecutionRequest, RunOptions};
use ka_runner_daemon::target::Environment;

#[derive(Parser, Debug)]
#[command(name = "ka-runner-daemon")]
#[command(about = "MCP server that runs Khan Academy live-editor programs in headless Chrome")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON configuration file (overrides KA_RUNNER_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single source file and print the result
    #[arg(long, requires = "environment", conflicts_with = "stdio")]
    run: Option<PathBuf>,

    /// Run environment for --run (pjs, webpage, sql)
    #[arg(long, requires = "run")]
    environment: Option<Environment>,

    /// Where to write the captured image for --run
    #[arg(long, requires = "run")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_path(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        base_url = %config.target.base_url,
        timeout = ?config.run.timeout(),
        executable = ?config.browser.executable,
        "Loaded configuration"
    );

    let backend = ChromiumBackend::new(config.browser.clone());

    if args.stdio {
        mcp::serve_stdio(config, backend).await?;
    } else if let (Some(path), Some(environment)) = (&args.run, args.environment) {
        run_once(config, backend, path, environment, args.output.as_deref()).await?;
    } else {
        anyhow::bail!("Either --stdio or --run <FILE> --environment <ENV> is required");
    }

    Ok(())
}

async fn run_once(
    config: Config,
    backend: ChromiumBackend,
    path: &Path,
    environment: Environment,
    output: Option<&Path>,
) -> Result<()> {
    let code = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let request = ExecutionRequest {
        code,
        width: config.run.width(None),
        height: config.run.height(None),
        options: RunOptions::defaults(environment),
    };
    let limits = config.run.logs;
    let runner = Runner::new(Arc::new(config), Arc::new(backend));
    let result = runner.evaluate(request).await;

    println!("{}", mcp::render_summary(&result, limits));

    if let (Some(output), Some(image)) = (output, &result.image) {
        tokio::fs::write(output, &image.bytes)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!(path = %output.display(), format = image.format.extension(), "Wrote image");
    }

    if !result.success {
        anyhow::bail!("Run did not succeed");
    }
    Ok(())
}
