//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier attached to published events and metrics
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "fleet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Maximum positions pulled per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds between scheduled batches
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Units evaluated in parallel within one batch
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,
    /// Deadline for each registry/store/log call
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Failed attempts before a position is reported as stuck
    #[serde(default = "default_stuck_after_attempts")]
    pub stuck_after_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            interval_secs: default_interval_secs(),
            max_concurrent_units: default_max_concurrent_units(),
            call_timeout_ms: default_call_timeout_ms(),
            stuck_after_attempts: default_stuck_after_attempts(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_interval_secs() -> u64 {
    30
}

fn default_max_concurrent_units() -> usize {
    8
}

fn default_call_timeout_ms() -> u64 {
    5000
}

fn default_stuck_after_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct DwellConfig {
    /// Minutes inside a zone before a dwell event is due
    #[serde(default = "default_dwell_threshold_minutes")]
    pub threshold_minutes: u64,
    /// Minimum minutes between dwell events for the same unit and zone
    #[serde(default = "default_dwell_suppression_minutes")]
    pub suppression_minutes: u64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: default_dwell_threshold_minutes(),
            suppression_minutes: default_dwell_suppression_minutes(),
        }
    }
}

fn default_dwell_threshold_minutes() -> u64 {
    10
}

fn default_dwell_suppression_minutes() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    /// JSON file with checkpoint and sector definitions
    #[serde(default = "default_zones_file")]
    pub file: String,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self { file: default_zones_file() }
    }
}

fn default_zones_file() -> String {
    "config/zones.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// File path for the event log (JSONL format)
    #[serde(default = "default_events_file")]
    pub file: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { file: default_events_file() }
    }
}

fn default_events_file() -> String {
    "events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// File path for per-(unit, zone) state (JSONL, compacted on open)
    #[serde(default = "default_state_file")]
    pub file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { file: default_state_file() }
    }
}

fn default_state_file() -> String {
    "state.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying raw position reports (JSON)
    #[serde(default = "default_positions_topic")]
    pub positions_topic: String,
    /// Topic for emitted zone events (QoS 1)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            positions_topic: default_positions_topic(),
            events_topic: default_events_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_positions_topic() -> String {
    "fleet/positions".to_string()
}

fn default_events_topic() -> String {
    "fleet/events".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dwell: DwellConfig,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    batch_size: usize,
    interval_secs: u64,
    max_concurrent_units: usize,
    call_timeout_ms: u64,
    stuck_after_attempts: u32,
    dwell_threshold_minutes: u64,
    dwell_suppression_minutes: u64,
    zones_file: String,
    events_file: String,
    state_file: String,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_positions_topic: String,
    mqtt_events_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            batch_size: toml_config.engine.batch_size.max(1),
            interval_secs: toml_config.engine.interval_secs.max(1),
            max_concurrent_units: toml_config.engine.max_concurrent_units.max(1),
            call_timeout_ms: toml_config.engine.call_timeout_ms,
            stuck_after_attempts: toml_config.engine.stuck_after_attempts,
            dwell_threshold_minutes: toml_config.dwell.threshold_minutes,
            dwell_suppression_minutes: toml_config.dwell.suppression_minutes,
            zones_file: toml_config.zones.file,
            events_file: toml_config.events.file,
            state_file: toml_config.state.file,
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_positions_topic: toml_config.mqtt.positions_topic,
            mqtt_events_topic: toml_config.mqtt.events_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_concurrent_units(&self) -> usize {
        self.max_concurrent_units
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn stuck_after_attempts(&self) -> u32 {
        self.stuck_after_attempts
    }

    pub fn dwell_threshold(&self) -> Duration {
        Duration::from_secs(self.dwell_threshold_minutes * 60)
    }

    pub fn dwell_suppression(&self) -> Duration {
        Duration::from_secs(self.dwell_suppression_minutes * 60)
    }

    pub fn zones_file(&self) -> &str {
        &self.zones_file
    }

    pub fn events_file(&self) -> &str {
        &self.events_file
    }

    pub fn state_file(&self) -> &str {
        &self.state_file
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_positions_topic(&self) -> &str {
        &self.mqtt_positions_topic
    }

    pub fn mqtt_events_topic(&self) -> &str {
        &self.mqtt_events_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shrink batches
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Builder method for tests to set the per-call deadline
    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "fleet");
        assert_eq!(config.batch_size(), 100);
        assert_eq!(config.max_concurrent_units(), 8);
        assert_eq!(config.call_timeout(), Duration::from_millis(5000));
        assert_eq!(config.dwell_threshold(), Duration::from_secs(600));
        assert_eq!(config.dwell_suppression(), Duration::from_secs(900));
        assert!(!config.mqtt_enabled());
        assert_eq!(config.mqtt_positions_topic(), "fleet/positions");
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[engine]
batch_size = 25

[dwell]
threshold_minutes = 5
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.batch_size(), 25);
        assert_eq!(config.dwell_threshold(), Duration::from_secs(300));
        assert_eq!(config.dwell_suppression(), Duration::from_secs(900));
        assert_eq!(config.events_file(), "events.jsonl");
        assert_eq!(config.state_file(), "state.jsonl");
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let config = Config::default().with_batch_size(0);
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "geofence-engine".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["geofence-engine".to_string(), "--config=config/staging.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/staging.toml");
    }
}
