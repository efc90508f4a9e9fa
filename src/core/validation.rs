//! Configuration validation support.

use crate::error::ValidationError;

/// Trait for configuration validation.
///
/// Implemented by the configuration sections so that a bad value is reported
/// at startup instead of surfacing as a failed poll later on.
///
/// # Examples
///
/// ```rust
/// use pollwatch::core::Validate;
/// use pollwatch::error::ValidationError;
///
/// struct PollSettings {
///     interval_ms: u64,
/// }
///
/// impl Validate for PollSettings {
///     fn validate(&self) -> Result<(), ValidationError> {
///         if self.interval_ms == 0 {
///             return Err(ValidationError::invalid_field(
///                 "interval_ms",
///                 "must be greater than 0",
///             ));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Validate {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Should return a `ValidationError` describing what validation failed.
    fn validate(&self) -> Result<(), ValidationError>;
}
