//! hookline CLI: run the service or submit a registration to a running one.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hookline::config::Config;
use hookline::model::HookRequest;
use hookline::queue::OverflowPolicy;
use hookline::shutdown::wait_for_signal;
use hookline::telemetry::{TelemetryConfig, init_telemetry};
use tracing::info;

#[derive(Parser)]
#[command(name = "hookline", about = "Webhook intake, processing and dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service and pipeline
    Serve {
        /// TOML config file; environment variables override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Work queue capacity
        #[arg(long)]
        queue_capacity: Option<usize>,
        /// Behaviour when the work queue is full (block | reject)
        #[arg(long)]
        overflow_policy: Option<OverflowPolicy>,
        /// Processing workers
        #[arg(long)]
        workers: Option<usize>,
        /// Simulated processing delay in milliseconds
        #[arg(long)]
        processing_delay_ms: Option<u64>,
        /// Length of generated payloads
        #[arg(long)]
        payload_len: Option<usize>,
    },
    /// Register a subscriber address with a running service
    Submit {
        /// Subscriber address that will receive the payload
        address: String,
        /// Base URL of the running service
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("no .env file loaded: {e}");
    }
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            listen,
            queue_capacity,
            overflow_policy,
            workers,
            processing_delay_ms,
            payload_len,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::from_env()?,
            };
            if let Some(v) = listen {
                config.listen_addr = v;
            }
            if let Some(v) = queue_capacity {
                config.queue_capacity = v;
            }
            if let Some(v) = overflow_policy {
                config.overflow_policy = v;
            }
            if let Some(v) = workers {
                config.processing_workers = v;
            }
            if let Some(v) = processing_delay_ms {
                config.processing_delay = Duration::from_millis(v);
            }
            if let Some(v) = payload_len {
                config.payload_len = v;
            }
            config.validate()?;
            cmd_serve(config).await
        }
        Command::Submit { address, server } => cmd_submit(&server, address).await,
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "hookline".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("cannot bind {}", config.listen_addr))?;

    let report =
        hookline::server::serve(listener, &config, config.processor(), wait_for_signal()).await?;

    info!(
        completed = report.completed,
        accepted = report.stats.accepted,
        delivered = report.stats.delivered,
        delivery_failed = report.stats.delivery_failed,
        unfinished = report.stats.unfinished(),
        "shutdown complete"
    );
    Ok(())
}

async fn cmd_submit(server: &str, address: String) -> anyhow::Result<()> {
    let url = format!("{}/webhook", server.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&url)
        .json(&HookRequest { address })
        .send()
        .await
        .with_context(|| format!("cannot reach {url}"))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("submit rejected ({status}): {body}");
    }
    println!("Accepted ({status}): {body}");
    Ok(())
}
