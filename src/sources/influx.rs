//! InfluxDB 1.x HTTP query source.

use super::DataSource;
use crate::error::{MonitorError, Result};
use crate::record::Record;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Response body of `GET /query`.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    tags: Option<Map<String, Value>>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Data source reading the latest point of a measurement from InfluxDB.
///
/// Uses the InfluxDB 1.x `/query` HTTP endpoint with
/// `SELECT * FROM "<measurement>" ORDER BY time DESC LIMIT 1`, so the server
/// decides which row is the latest. The returned record maps every column
/// (including `time`) and any series tags to their values.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::sources::InfluxSource;
/// use std::time::Duration;
///
/// # fn example() -> pollwatch::error::Result<()> {
/// let source = InfluxSource::builder()
///     .with_server("localhost")
///     .with_port(8086)
///     .with_database("telemetry")
///     .with_credentials("reader", "secret")
///     .with_timeout(Duration::from_secs(5))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct InfluxSource {
    endpoint: String,
    database: String,
    client: Client,
    credentials: Option<(String, String)>,
}

impl InfluxSource {
    /// Create a new builder for constructing an InfluxDB source.
    pub fn builder() -> InfluxSourceBuilder {
        InfluxSourceBuilder::new()
    }

    /// The `/query` URL this source talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DataSource for InfluxSource {
    async fn fetch_latest(&self, measurement: &str) -> Result<Option<Record>> {
        let query = latest_query(measurement);
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[("db", self.database.as_str()), ("q", query.as_str())]);

        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::DataSource(format!("InfluxDB request failed: {}", e)))?;

        let status = response.status();
        let body: QueryResponse = response.json().await.map_err(|e| {
            MonitorError::DataSource(format!(
                "Failed to parse InfluxDB response (status {}): {}",
                status, e
            ))
        })?;

        if !status.is_success() {
            return Err(MonitorError::DataSource(format!(
                "InfluxDB query failed with status {}: {}",
                status,
                body.error
                    .as_deref()
                    .or(status.canonical_reason())
                    .unwrap_or("Unknown")
            )));
        }

        latest_record(body)
    }

    fn name(&self) -> String {
        format!("influxdb:{}/{}", self.endpoint, self.database)
    }
}

/// Builder for constructing an `InfluxSource`.
pub struct InfluxSourceBuilder {
    server: Option<String>,
    port: u16,
    https: bool,
    database: Option<String>,
    credentials: Option<(String, String)>,
    timeout: Duration,
}

impl InfluxSourceBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            server: None,
            port: 8086,
            https: false,
            database: None,
            credentials: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the InfluxDB host name or address.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the HTTP port. Default is 8086.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Talk to the server over HTTPS.
    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Set the database to query.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set basic authentication credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set the request timeout.
    ///
    /// Default is 5 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the InfluxDB source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - No server or database is provided
    /// - The HTTP client cannot be constructed
    pub fn build(self) -> Result<InfluxSource> {
        let server = self
            .server
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MonitorError::Config("InfluxDB server is required".to_string()))?;
        let database = self
            .database
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| MonitorError::Config("InfluxDB database is required".to_string()))?;

        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| MonitorError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let scheme = if self.https { "https" } else { "http" };
        let endpoint = query_endpoint(server.trim(), scheme, self.port);

        Ok(InfluxSource {
            endpoint,
            database,
            client,
            credentials: self.credentials,
        })
    }
}

impl Default for InfluxSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The `/query` URL for `server`, which may carry its own scheme and port.
/// `port` is used only when the server names none.
fn query_endpoint(server: &str, default_scheme: &str, port: u16) -> String {
    let (scheme, rest) = server.split_once("://").unwrap_or((default_scheme, server));
    let rest = rest.trim_end_matches('/');
    let (authority, path) = match rest.find('/') {
        Some(at) => rest.split_at(at),
        None => (rest, ""),
    };

    // A bracketed IPv6 host ends in ']' unless a port follows it
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, p)| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if has_port {
        format!("{}://{}{}/query", scheme, authority, path)
    } else {
        format!("{}://{}:{}{}/query", scheme, authority, port, path)
    }
}

/// InfluxQL statement selecting the newest point of `measurement`.
fn latest_query(measurement: &str) -> String {
    let escaped = measurement.replace('\\', "\\\\").replace('"', "\\\"");
    format!("SELECT * FROM \"{}\" ORDER BY time DESC LIMIT 1", escaped)
}

/// Extract the single latest row from a query response.
fn latest_record(response: QueryResponse) -> Result<Option<Record>> {
    if let Some(error) = response.error {
        return Err(MonitorError::DataSource(format!("InfluxDB error: {}", error)));
    }

    let Some(statement) = response.results.into_iter().next() else {
        return Ok(None);
    };
    if let Some(error) = statement.error {
        return Err(MonitorError::DataSource(format!("InfluxDB query error: {}", error)));
    }

    let Some(series) = statement.series.into_iter().next() else {
        return Ok(None);
    };
    let Some(row) = series.values.into_iter().next() else {
        return Ok(None);
    };

    if row.len() != series.columns.len() {
        return Err(MonitorError::DataSource(format!(
            "InfluxDB row has {} values for {} columns",
            row.len(),
            series.columns.len()
        )));
    }

    let mut fields = series.tags.unwrap_or_default();
    for (column, value) in series.columns.into_iter().zip(row) {
        fields.insert(column, value);
    }
    Ok(Some(Record::from(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> Result<Option<Record>> {
        latest_record(serde_json::from_value(body).unwrap())
    }

    #[test]
    fn test_builder() {
        let source = InfluxSource::builder()
            .with_server("influx.local")
            .with_port(9999)
            .with_database("metrics")
            .with_credentials("user", "pass")
            .with_timeout(Duration::from_secs(2))
            .build()
            .unwrap();

        assert_eq!(source.endpoint(), "http://influx.local:9999/query");
        assert_eq!(source.name(), "influxdb:http://influx.local:9999/query/metrics");
    }

    #[test]
    fn test_builder_https_and_explicit_scheme() {
        let source = InfluxSource::builder()
            .with_server("influx.local")
            .with_https(true)
            .with_database("metrics")
            .build()
            .unwrap();
        assert_eq!(source.endpoint(), "https://influx.local:8086/query");

        let source = InfluxSource::builder()
            .with_server("http://10.0.0.5/")
            .with_database("metrics")
            .build()
            .unwrap();
        assert_eq!(source.endpoint(), "http://10.0.0.5:8086/query");
    }

    #[test]
    fn test_server_port_is_not_doubled() {
        let source = InfluxSource::builder()
            .with_server("http://h:8086")
            .with_database("metrics")
            .build()
            .unwrap();
        assert_eq!(source.endpoint(), "http://h:8086/query");

        let source = InfluxSource::builder()
            .with_server("http://h")
            .with_port(9999)
            .with_database("metrics")
            .build()
            .unwrap();
        assert_eq!(source.endpoint(), "http://h:9999/query");

        assert_eq!(
            query_endpoint("influx.local:7000", "https", 8086),
            "https://influx.local:7000/query"
        );
        assert_eq!(query_endpoint("[::1]", "http", 8086), "http://[::1]:8086/query");
        assert_eq!(query_endpoint("http://[::1]:9000/", "http", 8086), "http://[::1]:9000/query");
        assert_eq!(
            query_endpoint("http://proxy/influx", "http", 8086),
            "http://proxy:8086/influx/query"
        );
    }

    #[test]
    fn test_builder_requires_server_and_database() {
        let result = InfluxSource::builder().with_database("metrics").build();
        assert!(matches!(result, Err(MonitorError::Config(_))));

        let result = InfluxSource::builder().with_server("localhost").build();
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_latest_query_quotes_measurement() {
        assert_eq!(
            latest_query("cpu"),
            "SELECT * FROM \"cpu\" ORDER BY time DESC LIMIT 1"
        );
        assert_eq!(
            latest_query("we\"ird"),
            "SELECT * FROM \"we\\\"ird\" ORDER BY time DESC LIMIT 1"
        );
    }

    #[test]
    fn test_parse_row() {
        let record = parse(json!({
            "results": [{
                "statement_id": 0,
                "series": [{
                    "name": "cpu",
                    "tags": {"host": "a"},
                    "columns": ["time", "usage", "cores"],
                    "values": [["2024-03-01T10:00:00Z", 0.64, [1, 2]]]
                }]
            }]
        }))
        .unwrap()
        .unwrap();

        assert_eq!(record.get("time"), Some(&json!("2024-03-01T10:00:00Z")));
        assert_eq!(record.get("usage"), Some(&json!(0.64)));
        assert_eq!(record.get("cores"), Some(&json!([1, 2])));
        assert_eq!(record.get("host"), Some(&json!("a")));
    }

    #[test]
    fn test_parse_empty_measurement() {
        assert!(parse(json!({"results": [{"statement_id": 0}]})).unwrap().is_none());
        assert!(parse(json!({"results": []})).unwrap().is_none());
        assert!(
            parse(json!({"results": [{"series": [{"columns": ["time"], "values": []}]}]}))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_parse_errors() {
        let result = parse(json!({"results": [{"statement_id": 0, "error": "database not found: x"}]}));
        assert!(matches!(result, Err(MonitorError::DataSource(_))));

        let result = parse(json!({"error": "error parsing query"}));
        assert!(matches!(result, Err(MonitorError::DataSource(_))));

        let result = parse(json!({
            "results": [{"series": [{"columns": ["time", "v"], "values": [["t"]]}]}]
        }));
        assert!(matches!(result, Err(MonitorError::DataSource(_))));
    }
}
