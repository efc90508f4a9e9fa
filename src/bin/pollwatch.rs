//! pollwatch daemon
//!
//! Polls an InfluxDB measurement for its latest point, publishes every cycle's
//! outcome to an MQTT topic, and serves the latest outcome over HTTP.
//!
//! # Configuration
//!
//! Settings are read from a JSON, YAML, or TOML file (`config.json` by
//! default), then overridden by `POLLWATCH_*` environment variables with `__`
//! separating nested keys, e.g. `POLLWATCH_INFLUXDB__POLL=1000`. `PORT`
//! overrides the pull endpoint's port.
//!
//! # Example
//!
//! ```bash
//! RUST_LOG=pollwatch=debug ./pollwatch --config /etc/pollwatch/config.json
//! curl http://localhost:3001/data
//! ```

use clap::Parser;
use pollwatch::core::{ConfigLoader, ENV_PREFIX, ENV_SEPARATOR, Monitor, MonitorConfig};
use pollwatch::error::{MonitorError, Result};
use pollwatch::notify::MqttSink;
use pollwatch::server;
use pollwatch::sources::InfluxSource;
use pollwatch::store::FileStateStore;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (.json, .yaml, .yml, .toml)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Pull endpoint address, overriding the configuration and PORT
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "pollwatch starting");

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %e, "pollwatch exited with an error");
    }
    ExitCode::from(exit_status(&result))
}

/// Only configuration errors end the process with a failure status.
fn exit_status(result: &Result<()>) -> u8 {
    match result {
        Err(e) if e.is_fatal() => 1,
        _ => 0,
    }
}

/// Log whatever went wrong while stopping. Shutdown errors never fail a
/// signal-triggered exit.
fn settle_shutdown(stopped: Result<()>, served: Result<()>) -> Result<()> {
    if let Err(e) = stopped {
        warn!(error = %e, "Monitor did not stop cleanly");
    }
    if let Err(e) = served {
        warn!(error = %e, "Pull endpoint did not stop cleanly");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigLoader::new()
        .with_file(&cli.config)
        .with_env_overrides(ENV_PREFIX, ENV_SEPARATOR)
        .load_monitor_config()?;
    apply_listen_overrides(&mut config, cli.listen)?;

    info!(
        server = %config.influxdb.server,
        database = %config.influxdb.database,
        measurement = %config.influxdb.measurement,
        poll_ms = config.influxdb.poll,
        topic = %config.mqtt.topic,
        state = %config.state.path.display(),
        "Configuration loaded"
    );

    let monitor = build_monitor(&config)?;
    let listener = TcpListener::bind(&config.http.listen_addr)
        .await
        .map_err(|e| {
            MonitorError::Config(format!(
                "cannot bind pull endpoint to {}: {}",
                config.http.listen_addr, e
            ))
        })?;

    monitor.start()?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(server::serve(listener, monitor.pull_cache(), async move {
        let _ = stop_rx.wait_for(|stop| *stop).await;
    }));

    shutdown_signal().await;

    let stopped = monitor.shutdown().await;
    let _ = stop_tx.send(true);
    let served = match server.await {
        Ok(result) => result,
        Err(e) => Err(MonitorError::Other(format!("pull endpoint task failed: {}", e))),
    };

    settle_shutdown(stopped, served)?;
    info!("Shutdown complete");
    Ok(())
}

fn apply_listen_overrides(config: &mut MonitorConfig, listen: Option<String>) -> Result<()> {
    if let Some(addr) = listen {
        config.http.listen_addr = addr;
        return Ok(());
    }

    if let Ok(port) = std::env::var("PORT") {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| MonitorError::Config(format!("PORT '{}' is not a valid port", port)))?;
        config.http = config.http.clone().with_port(port);
    }
    Ok(())
}

fn build_monitor(config: &MonitorConfig) -> Result<Monitor> {
    let influx = &config.influxdb;
    let mut source = InfluxSource::builder()
        .with_server(&influx.server)
        .with_port(influx.port)
        .with_https(influx.https)
        .with_database(&influx.database)
        .with_timeout(influx.timeout());
    if let Some(username) = &influx.username {
        source = source.with_credentials(username, influx.password.clone().unwrap_or_default());
    }

    let mqtt = &config.mqtt;
    let mut sink = MqttSink::builder()
        .with_url(&mqtt.url)
        .with_client_id(mqtt.client_id())
        .with_keep_alive(mqtt.keep_alive());
    if let Some((username, password)) = mqtt.credentials() {
        sink = sink.with_credentials(username, password);
    }

    Monitor::builder()
        .with_source(source.build()?)
        .with_sink(sink.build()?)
        .with_store(FileStateStore::new(&config.state.path))
        .with_measurement(&influx.measurement)
        .with_topic(&mqtt.topic)
        .with_interval(influx.poll_interval())
        .with_fetch_timeout(influx.timeout())
        .with_publish_timeout(mqtt.timeout())
        .build()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
