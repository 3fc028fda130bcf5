use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use tokio::io::AsyncReadExt;

use tally::config::{CONFIG_FILE, Config};
use tally::error::HarnessError;
use tally::models::{Run, TestResult};
use tally::report;
use tally::runner::shell::ShellLoader;
use tally::runner::{ExecutionDriver, SuiteLoader};
use tally::workspace::{self, SourceCode};

/// Run bash test scripts under a global time limit and print a JSON report.
#[derive(Debug, Parser)]
#[command(name = "tally", version)]
struct Cli {
    /// Run the test scripts already in this directory instead of reading a payload from stdin.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Config file to use instead of `tally.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Logs go to stderr; stdout is reserved for the report.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("TALLY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    report::install_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => report::emit(&Run::aborted(format!("invalid arguments: {}", e.kind()))),
    };

    let run = match run(cli).await {
        Ok(results) => Run::completed(results),
        Err(e) => {
            tracing::error!(error = ?e, "run aborted");
            Run::aborted(e.to_string())
        }
    };
    report::emit(&run)
}

async fn run(cli: Cli) -> Result<Vec<TestResult>, HarnessError> {
    let config_path = cli.config.clone().unwrap_or_else(|| {
        cli.workspace
            .as_deref()
            .unwrap_or(Path::new("."))
            .join(CONFIG_FILE)
    });
    let timeout_var = std::env::var("TIMEOUT").ok();
    let config = Config::load(&config_path)?.resolve(timeout_var.as_deref())?;

    // Keep the staged directory alive until the suite is done with it.
    let (_staged, dir, modules) = match cli.workspace {
        Some(dir) => {
            let modules = workspace::discover_modules(&dir)
                .map_err(|e| HarnessError::Load(format!("{e:#}")))?;
            (None, dir, modules)
        }
        None => {
            let payload = read_payload().await.map_err(HarnessError::Payload)?;
            let staged = payload.stage().map_err(HarnessError::Internal)?;
            let dir = staged.path().to_path_buf();
            (Some(staged), dir, payload.test_modules())
        }
    };

    let loader = ShellLoader::new();
    tracing::info!(loader = loader.name(), modules = ?modules, "loading suite");
    let suite = loader
        .load(&dir, &modules)
        .await
        .map_err(|e| HarnessError::Load(format!("{e:#}")))?;

    ExecutionDriver::new(config).run(suite).await
}

async fn read_payload() -> anyhow::Result<SourceCode> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read stdin")?;
    SourceCode::parse(&input)
}
