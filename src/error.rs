//! Error types for pollwatch.

use std::fmt;
use std::time::Duration;

/// Result type alias for pollwatch operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while polling, persisting, or delivering.
///
/// Only [`MonitorError::Config`] is fatal. Every other variant is contained
/// within the poll cycle that produced it.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The data source failed to return a result.
    #[error("Data source error: {0}")]
    DataSource(String),

    /// A bounded operation did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out (e.g. "fetch", "publish")
        operation: &'static str,
        /// The configured bound
        after: Duration,
    },

    /// Writing the durable state slot failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A notification sink failed to accept an event.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Failed to serialize or deserialize a record or event.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases.
    #[error("Monitor error: {0}")]
    Other(String),
}

impl MonitorError {
    /// Whether this error must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this error came from the data source side of a cycle.
    pub fn is_data_source(&self) -> bool {
        matches!(
            self,
            Self::DataSource(_)
                | Self::Timeout {
                    operation: "fetch",
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization(err.to_string())
    }
}

/// Validation error for configuration validation.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors, returning `Ok` when it is empty.
    pub fn from_list(mut errors: Vec<ValidationError>) -> std::result::Result<(), Self> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for MonitorError {
    fn from(err: ValidationError) -> Self {
        MonitorError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_is_fatal() {
        assert!(MonitorError::Config("missing measurement".into()).is_fatal());
        assert!(!MonitorError::DataSource("refused".into()).is_fatal());
        assert!(!MonitorError::Persistence("disk full".into()).is_fatal());
        assert!(!MonitorError::Delivery("broker down".into()).is_fatal());
    }

    #[test]
    fn test_fetch_timeout_counts_as_data_source() {
        let err = MonitorError::Timeout {
            operation: "fetch",
            after: Duration::from_secs(5),
        };
        assert!(err.is_data_source());

        let err = MonitorError::Timeout {
            operation: "publish",
            after: Duration::from_secs(5),
        };
        assert!(!err.is_data_source());
    }

    #[test]
    fn test_validation_list() {
        assert!(ValidationError::from_list(vec![]).is_ok());

        let single = ValidationError::from_list(vec![ValidationError::custom("a")]);
        assert!(matches!(single, Err(ValidationError::Custom(_))));

        let many = ValidationError::from_list(vec![
            ValidationError::invalid_field("poll", "must be > 0"),
            ValidationError::invalid_field("topic", "must not be empty"),
        ]);
        let err: MonitorError = many.unwrap_err().into();
        let text = err.to_string();
        assert!(text.contains("poll"));
        assert!(text.contains("topic"));
    }
}
