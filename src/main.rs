//! Daemon entrypoint
//!
//! Loads the TOML config (first CLI argument, or `METRICD_CONFIG`, or
//! defaults), starts the ingestion pipeline, and runs the flush loop until
//! SIGINT. Flushed batches are written to stdout as JSON lines, one point
//! per line, for a downstream uploader to consume.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};

use metricd::{Config, Diagnostics, Server};

fn load_config() -> Result<Config, metricd::config::ConfigError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("METRICD_CONFIG").ok())
        .map(PathBuf::from);

    match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            Config::load(&path)
        }
        None => {
            info!("no config given, using defaults");
            Ok(Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "could not load config");
            return ExitCode::FAILURE;
        }
    };

    let diagnostics = Diagnostics::new();
    let server = match Server::start(&config, diagnostics.clone()) {
        Ok(server) => server,
        Err(e) => {
            // a failed bind means the process cannot serve its purpose
            error!(error = %e, "could not start server");
            return ExitCode::FAILURE;
        }
    };

    info!(
        address = %server.local_addr(),
        workers = config.num_workers,
        readers = config.num_readers,
        interval_secs = config.flush_interval_secs,
        "metricd running"
    );

    let period = config.flush_interval();
    let flush_task = tokio::spawn(async move {
        server
            .run_flush_loop(period, |points| {
                let mut out = String::new();
                for point in &points {
                    match serde_json::to_string(point) {
                        Ok(line) => {
                            out.push_str(&line);
                            out.push('\n');
                        }
                        Err(e) => error!(error = %e, "could not serialize point"),
                    }
                }
                print!("{}", out);
            })
            .await;
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutting down"),
        Err(e) => error!(error = %e, "could not listen for shutdown signal"),
    }

    flush_task.abort();
    let snap = diagnostics.snapshot();
    info!(
        packets = snap.packets_read,
        samples = snap.samples_routed,
        parse_errors = snap.parse_errors,
        "final ingest counters"
    );
    ExitCode::SUCCESS
}
