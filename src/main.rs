//! Geofence engine - derives enter/exit/dwell events from unit positions
//!
//! Module structure:
//! - `domain/` - Core types (Position, zones, UnitZoneState, ZoneEvent) and geometry
//! - `services/` - Zone registry, state store, emitter, position source, processor
//! - `io/` - External interfaces (zone file, JSONL event log, MQTT, Prometheus)
//! - `infra/` - Infrastructure (Config, errors, Metrics)

use clap::Parser;
use geofence_engine::infra::{Config, Metrics};
use geofence_engine::io::{
    create_egress_channel, JsonZoneRegistry, JsonlEventLog, JsonlStateStore, MqttPublisher,
};
use geofence_engine::services::{
    EventEmitter, PositionProcessor, PositionQueue, ProcessorSettings,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Geofence engine - zone event detection for tracked units
#[derive(Parser, Debug)]
#[command(name = "geofence-engine", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single batch and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-position evaluation
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git_hash = %env!("GIT_HASH"), "geofence-engine starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        batch_size = %config.batch_size(),
        interval_secs = %config.interval().as_secs(),
        max_concurrent_units = %config.max_concurrent_units(),
        call_timeout_ms = %config.call_timeout().as_millis(),
        zones_file = %config.zones_file(),
        events_file = %config.events_file(),
        state_file = %config.state_file(),
        mqtt_enabled = %config.mqtt_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let registry = Arc::new(JsonZoneRegistry::new(config.zones_file()));
    let states = Arc::new(JsonlStateStore::open(config.state_file())?);
    let event_log = Arc::new(JsonlEventLog::open(config.events_file())?);
    let queue = Arc::new(PositionQueue::new());

    let mut emitter = EventEmitter::new(event_log);

    if config.mqtt_enabled() {
        // Event publisher
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
        emitter = emitter.with_egress(egress_sender);
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Position intake
        let intake_config = config.clone();
        let intake_queue = queue.clone();
        let intake_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geofence_engine::io::mqtt::start_position_intake(
                &intake_config,
                intake_queue,
                intake_shutdown,
            )
            .await
            {
                error!(error = %e, "mqtt_intake_failed");
            }
        });
    }

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 && !args.once {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = geofence_engine::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_failed");
            }
        });
    }

    // Periodic metrics summary
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(metrics_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let processor = PositionProcessor::new(
        queue,
        registry,
        states,
        emitter,
        metrics.clone(),
        ProcessorSettings::from_config(&config),
    );

    if args.once {
        let result = processor.run_batch().await;
        metrics.report().log();
        let _ = shutdown_tx.send(true);
        result?;
        info!("geofence-engine single batch complete");
        return Ok(());
    }

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    processor.run(config.interval(), shutdown_rx).await;

    info!("geofence-engine shutdown complete");
    Ok(())
}
