//! Kestrel test server.
//!
//! Hosts the fixture services behind the tick-driven host loop and speaks
//! JSON lines on stdio: one `Request` per input line, one `Response` per
//! output line. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kestrel_core::Request;
use kestrel_server::service::domain::{catalog, test_service::test_services};
use kestrel_server::service::{Dispatcher, Host, ServerConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser)]
#[command(name = "test-server")]
#[command(about = "Kestrel test server speaking JSON lines on stdio", long_about = None)]
struct Cli {
    /// Milliseconds between host loop ticks
    #[arg(long, env = "KESTREL_TICK_MS", default_value_t = 20)]
    tick_ms: u64,

    /// Fresh calls dispatched per connection and tick (unlimited if unset)
    #[arg(long, env = "KESTREL_MAX_CALLS_PER_TICK")]
    max_calls_per_tick: Option<usize>,

    /// Capacity of the request submission queue
    #[arg(long, env = "KESTREL_QUEUE_CAPACITY", default_value_t = 256)]
    queue_capacity: usize,

    /// Name recorded for the stdio client
    #[arg(long, env = "KESTREL_CLIENT_NAME", default_value = "stdio")]
    client_name: String,

    /// Log output format
    #[arg(long, value_enum, env = "KESTREL_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = ServerConfig {
        tick_interval_ms: cli.tick_ms,
        max_calls_per_tick: cli.max_calls_per_tick,
        call_queue_capacity: cli.queue_capacity,
        ..ServerConfig::default()
    };
    let catalog = catalog(test_services()).context("scanning fixture services")?;
    let dispatcher = Arc::new(Dispatcher::new(catalog, config));
    tracing::info!(
        services = dispatcher.services().services.len(),
        procedures = dispatcher.registry().len(),
        "services scanned"
    );

    let mut host = Host::start(Arc::clone(&dispatcher));
    let connection = host.connect(Some(&cli.client_name));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed request");
                continue;
            }
        };
        let response = host.submit(connection, request).await?;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    host.disconnect(connection).await?;
    host.stop().await;
    let snapshot = dispatcher.snapshot();
    tracing::info!(status = %serde_json::to_string(&snapshot)?, "server stopped");
    Ok(())
}
