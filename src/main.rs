//! twarc2 command line tool.

use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use twarc2::commands;
use twarc2::config::{Args, Config};
use twarc2::sdk::{resolve_bearer_token, Client};
use twarc2::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from(&args);

    // Initialize logging; RUST_LOG applies unless --debug is given
    let filter = if config.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let writer = match &config.log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.log.is_none())
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    info!("twarc2 v{}", VERSION);
    debug!(config = ?serde_json::to_value(&config).ok(), "configuration");

    let token = resolve_bearer_token(config.bearer_token.as_deref()).await?;

    let client = Client::builder(token)
        .api_url(&config.api_url)
        .connection_errors(config.connection_errors)
        .http_errors(config.http_errors)
        .build()?;

    commands::run(&client, args.command).await?;

    let metrics = client.metrics().snapshot();
    info!(
        requests = metrics.requests_total,
        retries = metrics.retries_total,
        records = metrics.records_total,
        "done"
    );

    Ok(())
}
