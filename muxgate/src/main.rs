//! muxgate CLI entry point.
//!
//! Exit codes: 0 on clean shutdown at upstream EOF, 1 for configuration
//! errors, 2 for fatal runtime errors.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use muxgate::cli::Cli;
use muxgate::error::GatewayError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match muxgate_core::config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            eprintln!("muxgate: {e}");
            std::process::exit(1);
        }
    };

    let code = match muxgate::gateway::run_stdio(config).await {
        Ok(code) => code,
        Err(GatewayError::Config(e)) => {
            eprintln!("muxgate: {e}");
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "fatal runtime error");
            eprintln!("muxgate: {e}");
            2
        }
    };

    std::process::exit(code);
}

/// Initialise the tracing subscriber on stderr.
///
/// Stdout carries protocol frames, so diagnostics must never touch it.
/// `RUST_LOG` wins over `--log-level` when both are set.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
