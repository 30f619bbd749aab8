use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use test_host::cli::{Cli, EXIT_USAGE};
use test_host::{GuestSpec, RunResult, TestHost};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            return exit_code(EXIT_USAGE);
        }
    };

    let config = match cli.host_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("test-host: {e}");
            return exit_code(EXIT_USAGE);
        }
    };

    let spec = GuestSpec::select(&cli.guest);
    tracing::info!(guest = %spec, timeout = config.timeout_secs, "Launching test run");

    let host = match TestHost::new(config) {
        Ok(host) => host.echo(cli.echo()),
        Err(e) => {
            eprintln!("test-host: {e}");
            return exit_code(EXIT_USAGE);
        }
    };
    let result = host.run(&spec).await;
    summarize(&result);

    if let Err(e) = report(&cli, &result) {
        tracing::error!(error = %format!("{e:#}"), "failed to write run report");
    }
    exit_code(result.exit_code)
}

fn summarize(result: &RunResult) {
    if result.passed() {
        tracing::info!(
            guest = %result.guest,
            elapsed_ms = result.elapsed_ms,
            "run passed"
        );
        return;
    }
    match &result.message {
        Some(message) => tracing::warn!(
            guest = %result.guest,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "{message}"
        ),
        None => tracing::warn!(
            guest = %result.guest,
            status = %result.status,
            elapsed_ms = result.elapsed_ms,
            "run did not pass"
        ),
    }
}

fn report(cli: &Cli, result: &RunResult) -> Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    if let Some(path) = &cli.report {
        let json = serde_json::to_vec_pretty(result)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    Ok(())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
