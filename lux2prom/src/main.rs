//! MQTT to Prometheus bridge for LuxPower inverter dongles.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use lux2prom::{Dispatcher, ExporterConfig, HttpServer, Registry, TelemetrySubscriber};

/// Time allowed for tasks to finish after shutdown is signalled.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Export LuxPower dongle readings as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "lux2prom")]
#[command(about = "Bridge LuxPower dongle MQTT telemetry to Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker host.
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port.
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT username.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password.
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Dongle serial to follow.
    #[arg(long, env = "DONGLE")]
    dongle: Option<String>,

    /// Port for the metrics endpoint; binds 0.0.0.0.
    #[arg(long, env = "PROMETHEUS_PORT")]
    prometheus_port: Option<u16>,

    /// HTTP listen address (overrides config and --prometheus-port).
    #[arg(long)]
    listen: Option<String>,

    /// Path to a JSON5 metric catalog.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply CLI and environment overrides on top of the file configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(host) = self.mqtt_host {
            config.mqtt.host = Some(host);
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(username) = self.mqtt_username {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = self.mqtt_password {
            config.mqtt.password = Some(password);
        }
        if let Some(dongle) = self.dongle {
            config.dongle.id = Some(dongle);
        }
        if let Some(port) = self.prometheus_port {
            config.prometheus.listen = format!("0.0.0.0:{}", port);
        }
        if let Some(listen) = self.listen {
            config.prometheus.listen = listen;
        }
        if let Some(catalog) = self.catalog {
            config.catalog = Some(catalog);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    args.apply(&mut config);

    lux_common::init_tracing(&config.logging)?;

    info!("Starting lux2prom");

    config.validate()?;

    info!(
        mqtt_host = ?config.mqtt.host,
        mqtt_port = config.mqtt.port,
        mqtt_username = ?config.mqtt.username,
        mqtt_password = %config.mqtt.masked_password(),
        dongle = %config.dongle_id(),
        topic = %config.topic(),
        listen = %config.prometheus.listen,
        catalog = ?config.catalog,
        "Current configuration"
    );

    // Build the registry
    let catalog = config.load_catalog()?;
    let registry = Arc::new(Registry::build(
        &catalog,
        &config.prometheus.namespace,
        config.dongle_id(),
    )?);
    info!(metrics = registry.len(), "Metric registry built");

    let dispatcher = Arc::new(Dispatcher::new(registry));

    // Parse listen address
    let listen_addr = config
        .prometheus
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let http_server = HttpServer::new(
        dispatcher.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let listener = http_server.bind().await?;

    let (client, eventloop) = lux_common::connect(&config.mqtt).await?;
    let subscriber = TelemetrySubscriber::new(dispatcher.clone(), client, eventloop, config.topic());

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start subscriber
    let subscriber_shutdown = shutdown_rx.clone();
    let mut subscriber_task =
        tokio::spawn(async move { subscriber.run(subscriber_shutdown).await });

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let mut http_task =
        tokio::spawn(async move { http_server.serve(listener, http_shutdown).await });

    info!("Press Ctrl+C to exit...");

    // Wait for a shutdown signal or for either task to stop on its own
    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            Ok(())
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            Ok(())
        }
        result = &mut subscriber_task => Err(task_failure("MQTT subscriber", result)),
        result = &mut http_task => Err(task_failure("HTTP server", result)),
    };

    if let Err(e) = &outcome {
        error!("{:#}", e);
    }

    // Signal shutdown; the receivers may already be gone
    let _ = shutdown_tx.send(true);

    // Wait for the remaining tasks to complete
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        for task in [subscriber_task, http_task] {
            if !task.is_finished() {
                let _ = task.await;
            }
        }
    })
    .await;

    let stats = dispatcher.stats();
    info!(
        messages_received = stats.messages_received,
        messages_malformed = stats.messages_malformed,
        messages_invalid = stats.messages_invalid,
        fields_sent = stats.fields_sent,
        fields_ignored = stats.fields_ignored,
        fields_failed = stats.fields_failed,
        "Final statistics"
    );

    info!("lux2prom stopped");
    outcome
}

/// Describe a task that ended before shutdown was requested.
fn task_failure(
    task: &str,
    result: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow::anyhow!("{} stopped unexpectedly", task),
        Ok(Err(e)) => e.context(format!("{} failed", task)),
        Err(e) if e.is_panic() => anyhow::anyhow!("{} panicked", task),
        Err(e) => anyhow::anyhow!("{} was cancelled: {}", task, e),
    }
}

/// Resolve when SIGTERM is received. Never resolves on other platforms.
async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    }

    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_failure_error() {
        let handle = tokio::spawn(async { Err::<(), _>(anyhow::anyhow!("subscribe refused")) });
        let err = task_failure("MQTT subscriber", handle.await);
        assert_eq!(
            format!("{:#}", err),
            "MQTT subscriber failed: subscribe refused"
        );
    }

    #[tokio::test]
    async fn test_task_failure_panic() {
        let handle = tokio::spawn(async {
            if true {
                panic!("route conflict");
            }
            anyhow::Ok(())
        });
        let err = task_failure("HTTP server", handle.await);
        assert_eq!(err.to_string(), "HTTP server panicked");
    }

    #[tokio::test]
    async fn test_task_failure_unexpected_exit() {
        let handle = tokio::spawn(async { anyhow::Ok(()) });
        let err = task_failure("HTTP server", handle.await);
        assert_eq!(err.to_string(), "HTTP server stopped unexpectedly");
    }
}
