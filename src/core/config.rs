//! Typed configuration for the monitor process.

use super::Validate;
use crate::error::ValidationError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete process configuration.
///
/// Key names match the deployed `config.json` layout
/// (`influxdb.poll` is the interval in milliseconds).
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Data source settings
    pub influxdb: InfluxConfig,
    /// Push channel settings
    pub mqtt: MqttConfig,
    /// Pull endpoint settings
    #[serde(default)]
    pub http: HttpConfig,
    /// Durable state settings
    #[serde(default)]
    pub state: StateConfig,
}

/// InfluxDB connection and polling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    /// Host name or address
    pub server: String,
    /// HTTP port
    #[serde(default = "default_influx_port")]
    pub port: u16,
    /// Use HTTPS
    #[serde(default)]
    pub https: bool,
    /// Database to query
    pub database: String,
    /// Optional basic-auth user
    #[serde(default)]
    pub username: Option<String>,
    /// Optional basic-auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Measurement whose latest point is watched
    pub measurement: String,
    /// Poll interval in milliseconds
    pub poll: i64,
    /// Fetch timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl InfluxConfig {
    /// Poll interval. Only meaningful after validation.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.max(0) as u64)
    }

    /// Fetch timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// MQTT broker and topic settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host:port`
    pub url: String,
    /// Topic every cycle's event is published to
    pub topic: String,
    /// Client identifier
    #[serde(default, alias = "clientid", alias = "clientId")]
    pub client_id: Option<String>,
    /// Keep-alive in seconds
    #[serde(default, alias = "keepalive")]
    pub keep_alive_secs: Option<u64>,
    /// Publish timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional broker user
    #[serde(default)]
    pub username: Option<String>,
    /// Optional broker password
    #[serde(default)]
    pub password: Option<String>,
    /// Connect options in the `config.json` layout. Top-level keys win.
    #[serde(default)]
    pub options: MqttClientOptions,
}

/// The `mqtt.options` block of `config.json`.
///
/// Only the keys below are read; other client options are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MqttClientOptions {
    /// Client identifier
    #[serde(default, alias = "clientid", alias = "clientId")]
    pub client_id: Option<String>,
    /// Broker user
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password
    #[serde(default)]
    pub password: Option<String>,
    /// Keep-alive in seconds
    #[serde(default, alias = "keep_alive")]
    pub keepalive: Option<u64>,
}

impl MqttConfig {
    /// Publish timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Client identifier, defaulting to `pollwatch`.
    pub fn client_id(&self) -> &str {
        self.client_id
            .as_deref()
            .or(self.options.client_id.as_deref())
            .unwrap_or(DEFAULT_CLIENT_ID)
    }

    /// Broker user and password, if a user is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let (username, password) = match &self.username {
            Some(username) => (username, &self.password),
            None => (self.options.username.as_ref()?, &self.options.password),
        };
        Some((username.as_str(), password.as_deref().unwrap_or_default()))
    }

    /// Keep-alive interval, defaulting to 30 seconds.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(
            self.keep_alive_secs
                .or(self.options.keepalive)
                .unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
        )
    }
}

/// Pull endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address the pull endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl HttpConfig {
    /// Bind on all interfaces at `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen_addr = format!("0.0.0.0:{}", port);
        self
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Durable state slot settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Path of the state file
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_influx_port() -> u16 {
    8086
}

fn default_timeout_ms() -> u64 {
    5_000
}

const DEFAULT_CLIENT_ID: &str = "pollwatch";

const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

fn default_listen_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./lastKnownData.json")
}

fn require(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError::invalid_field(field, "must not be empty"));
    }
}

impl Validate for MonitorConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        require(&mut errors, "influxdb.server", &self.influxdb.server);
        require(&mut errors, "influxdb.database", &self.influxdb.database);
        require(&mut errors, "influxdb.measurement", &self.influxdb.measurement);
        if self.influxdb.poll <= 0 {
            errors.push(ValidationError::invalid_field(
                "influxdb.poll",
                format!("must be a positive number of milliseconds, got {}", self.influxdb.poll),
            ));
        }
        if self.influxdb.timeout_ms == 0 {
            errors.push(ValidationError::invalid_field(
                "influxdb.timeout_ms",
                "must be greater than 0",
            ));
        }

        require(&mut errors, "mqtt.topic", &self.mqtt.topic);
        if !(self.mqtt.url.starts_with("mqtt://") || self.mqtt.url.starts_with("tcp://")) {
            errors.push(ValidationError::invalid_field(
                "mqtt.url",
                "must start with mqtt:// or tcp://",
            ));
        }
        if self.mqtt.timeout_ms == 0 {
            errors.push(ValidationError::invalid_field(
                "mqtt.timeout_ms",
                "must be greater than 0",
            ));
        }

        if self.http.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::invalid_field(
                "http.listen_addr",
                format!("'{}' is not a socket address", self.http.listen_addr),
            ));
        }

        if self.state.path.as_os_str().is_empty() {
            errors.push(ValidationError::invalid_field("state.path", "must not be empty"));
        }

        ValidationError::from_list(errors)
    }
}
