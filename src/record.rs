//! Records, observation state, and change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MonitorError, Result};

/// An opaque snapshot of the most recent data-source observation.
///
/// A record is a mapping of field names to JSON values. Two records are the
/// same observation when their canonical serializations are identical; field
/// order never matters. Fields are serialized in insertion order, which for
/// InfluxDB rows is column order.
///
/// # Examples
///
/// ```rust
/// use pollwatch::record::Record;
/// use serde_json::json;
///
/// let a = Record::from_value(json!({"temp": 21.5, "host": "a"})).unwrap();
/// let b = Record::from_value(json!({"host": "a", "temp": 21.5})).unwrap();
/// assert!(a.same_as(&b));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(MonitorError::Serialization(format!(
                "expected a JSON object for a record, got {}",
                kind_of(&other)
            ))),
        }
    }

    /// Add a field, replacing any previous value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// All fields of the record.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON with object keys sorted at every depth.
    pub fn canonical_json(&self) -> String {
        canonicalize(&Value::Object(self.0.clone())).to_string()
    }

    /// Structural equality: identical canonical serialization.
    pub fn same_as(&self, other: &Record) -> bool {
        self.canonical_json() == other.canonical_json()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The last known record and the time it last changed.
///
/// Exactly one of these exists per process. It is owned by the change
/// detector and written to the durable slot whenever it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationState {
    /// The most recently observed record, if any.
    #[serde(default)]
    pub last_record: Option<Record>,
    /// When `last_record` last changed.
    #[serde(default)]
    pub last_change_time: Option<DateTime<Utc>>,
}

impl ObservationState {
    /// State seeded with a record whose change time is unknown.
    pub fn with_record(record: Record) -> Self {
        Self {
            last_record: Some(record),
            last_change_time: None,
        }
    }

    /// Whether anything has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.last_record.is_none()
    }
}

/// Outcome of one poll cycle, as delivered to the push sink and pull cache.
///
/// Serializes to `{"dataChanged": bool, "lastChangeTime": timestamp|null, "data"?: record}`.
/// `data` is only present when `dataChanged` is true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Whether this cycle observed a new record.
    #[serde(rename = "dataChanged")]
    pub changed: bool,
    /// Time of the most recent change, `None` before the first observation.
    #[serde(rename = "lastChangeTime")]
    pub last_change_time: Option<DateTime<Utc>>,
    /// The new record, only when `changed` is true.
    #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
}

impl ChangeEvent {
    /// Event for a cycle that observed a new record.
    pub fn changed(at: DateTime<Utc>, record: Record) -> Self {
        Self {
            changed: true,
            last_change_time: Some(at),
            record: Some(record),
        }
    }

    /// Event for a cycle that observed nothing new.
    pub fn unchanged(last_change_time: Option<DateTime<Utc>>) -> Self {
        Self {
            changed: false,
            last_change_time,
            record: None,
        }
    }

    /// The event with its record dropped unless it reports a change.
    pub fn pull_view(&self) -> Self {
        Self {
            changed: self.changed,
            last_change_time: self.last_change_time,
            record: if self.changed { self.record.clone() } else { None },
        }
    }

    /// Serialize to the wire payload shared by push and pull.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
