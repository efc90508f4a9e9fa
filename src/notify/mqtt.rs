//! MQTT push sink.

use super::PushSink;
use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 1883;

/// Push sink publishing to an MQTT broker.
///
/// Messages are published with QoS 0 (at most once) and never retained. The
/// broker connection is driven by a background task which logs connection
/// errors and keeps reconnecting; a publish while the broker is unreachable
/// fails fast once the outgoing queue is full.
///
/// Must be built from within a Tokio runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::notify::MqttSink;
///
/// # async fn example() -> pollwatch::error::Result<()> {
/// let sink = MqttSink::builder()
///     .with_url("mqtt://broker.local:1883")
///     .with_client_id("pollwatch-1")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct MqttSink {
    client: AsyncClient,
    broker: String,
    closing: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Create a new builder for constructing an MQTT sink.
    pub fn builder() -> MqttSinkBuilder {
        MqttSinkBuilder::new()
    }

    fn spawn_event_loop(mut event_loop: EventLoop, closing: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if closing.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(error = %e, "MQTT connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl PushSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| MonitorError::Delivery(format!("MQTT publish failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // The request queue may be full while the broker is unreachable
        let disconnect = self.client.try_disconnect();

        let handle = self.event_loop.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        if let Err(e) = disconnect {
            debug!(error = %e, "MQTT disconnect not sent, connection dropped");
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("mqtt:{}", self.broker)
    }
}

/// Builder for constructing an `MqttSink`.
pub struct MqttSinkBuilder {
    url: Option<String>,
    client_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    capacity: usize,
}

impl MqttSinkBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            url: None,
            client_id: "pollwatch".to_string(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            capacity: 64,
        }
    }

    /// Set the broker URL, e.g. `mqtt://localhost:1883`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the MQTT client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set username/password authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the keep-alive interval. Default is 30 seconds.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the outgoing queue capacity. Default is 64.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Build the sink and start its connection task.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is missing or malformed.
    pub fn build(self) -> Result<MqttSink> {
        let url = self
            .url
            .ok_or_else(|| MonitorError::Config("MQTT url is required".to_string()))?;
        let (host, port) = parse_broker_url(&url)?;

        let mut options = MqttOptions::new(self.client_id, host.clone(), port);
        options.set_keep_alive(self.keep_alive.max(Duration::from_secs(1)));
        if let Some((username, password)) = self.credentials {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, self.capacity);
        let closing = Arc::new(AtomicBool::new(false));
        let handle = MqttSink::spawn_event_loop(event_loop, Arc::clone(&closing));

        Ok(MqttSink {
            client,
            broker: format!("{}:{}", host, port),
            closing,
            event_loop: Mutex::new(Some(handle)),
        })
    }
}

impl Default for MqttSinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `mqtt://host[:port]` (or `tcp://`) into host and port.
pub(crate) fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .ok_or_else(|| {
            MonitorError::Config(format!(
                "Unsupported MQTT url '{}': expected mqtt:// or tcp://",
                url
            ))
        })?;
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                MonitorError::Config(format!("Invalid port in MQTT url '{}'", url))
            })?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(MonitorError::Config(format!(
            "Missing host in MQTT url '{}'",
            url
        )));
    }
    Ok((host.to_string(), port))
}
