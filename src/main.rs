use anyhow::{anyhow, Context, Result};
use clap::Parser;
use handler_runner::app::{handle_fatal_error, init_logging, AppConfig};
use handler_runner::{HandlerRunner, RunnerConfig, RunnerError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Invoke a function handler in a child interpreter and print its result
#[derive(Parser)]
#[command(name = "handler-runner")]
#[command(about = "Invoke a function handler locally and print its return value", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Runner configuration file (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Handler as <path>/<module>.<function>
    #[arg(long)]
    handler: Option<String>,

    /// Runtime identifier, e.g. python3.12
    #[arg(long)]
    runtime: Option<String>,

    /// Adapter script run by the interpreter
    #[arg(long)]
    adapter: Option<PathBuf>,

    /// Interpreter flag requesting unbuffered output
    #[arg(long, allow_hyphen_values = true)]
    unbuffered_flag: Option<String>,

    /// JSON file with the event, or `-` for stdin
    #[arg(short, long)]
    event: Option<PathBuf>,

    /// JSON file with the context
    #[arg(long)]
    context: Option<PathBuf>,

    /// Fail if no result arrives within this time (e.g. "30s")
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Extra environment variable for the handler (KEY=VALUE)
    #[arg(short = 'E', long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Working directory of the handler process
    #[arg(short = 'C', long)]
    working_dir: Option<PathBuf>,

    /// Pretty-print the result
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let app_config = match AppConfig::new(verbose) {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e, verbose),
    };
    init_logging(&app_config);

    if let Err(e) = run(cli, app_config).await {
        handle_fatal_error(e, verbose);
    }
}

async fn run(cli: Cli, app: AppConfig) -> Result<()> {
    let config = build_config(&cli, &app).await?;
    let event = read_json(cli.event.as_deref()).await.context("Failed to read event")?;
    let context = read_json(cli.context.as_deref())
        .await
        .context("Failed to read context")?;

    let runner = HandlerRunner::new(config)?;
    debug!(
        "Invoking {}:{} with {}",
        runner.handler().path.display(),
        runner.handler().name,
        runner.interpreter()
    );

    let result = tokio::select! {
        result = runner.run(event, context) => result,
        _ = tokio::signal::ctrl_c() => Err(RunnerError::Cancelled),
    };
    runner.cleanup();
    let value = result?;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    println!("{rendered}");
    Ok(())
}

/// Merge the configuration file (if any) with command-line overrides
async fn build_config(cli: &Cli, app: &AppConfig) -> Result<RunnerConfig> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::load(path).await?,
        None => {
            let handler = cli
                .handler
                .clone()
                .ok_or_else(|| anyhow!("Please specify --handler or --config"))?;
            RunnerConfig::new(cli.runtime.as_deref().unwrap_or("python3"), handler)
        }
    };

    if let Some(handler) = &cli.handler {
        config.handler = handler.clone();
    }
    if let Some(runtime) = &cli.runtime {
        config.runtime = runtime.clone();
    }
    if let Some(adapter) = &cli.adapter {
        config.adapter = Some(adapter.clone());
    }
    if let Some(flag) = &cli.unbuffered_flag {
        config.unbuffered_flag = flag.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = Some(timeout);
    }
    config.working_dir = cli
        .working_dir
        .clone()
        .or(config.working_dir)
        .or_else(|| Some(app.working_dir.clone()));

    Ok(config.with_envs(cli.env.iter().cloned()))
}

async fn read_json(path: Option<&Path>) -> Result<Value> {
    let content = match path {
        None => return Ok(Value::Object(Default::default())),
        Some(p) if p == Path::new("-") => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
        Some(p) => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("Cannot read {}", p.display()))?,
    };
    serde_json::from_str(&content).context("Invalid JSON")
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))
}
