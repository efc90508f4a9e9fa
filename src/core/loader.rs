//! Configuration loader that layers files and environment variables.

use super::{MonitorConfig, Validate};
use crate::error::{MonitorError, Result};
use config::{Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Default environment prefix, e.g. `POLLWATCH_INFLUXDB__PORT=8087`.
pub const ENV_PREFIX: &str = "POLLWATCH";

/// Default separator for nested keys in environment variables.
pub const ENV_SEPARATOR: &str = "__";

enum Layer {
    File(PathBuf),
    Inline(String, FileFormat),
}

/// Loads configuration from files, then applies environment overrides.
///
/// Layers are merged in the order they were added; environment variables
/// always win.
///
/// # Examples
///
/// ```rust,no_run
/// use pollwatch::core::ConfigLoader;
///
/// # fn example() -> pollwatch::error::Result<()> {
/// let config = ConfigLoader::new()
///     .with_file("config.json")
///     .with_env_overrides("POLLWATCH", "__")
///     .load_monitor_config()?;
/// # Ok(())
/// # }
/// ```
pub struct ConfigLoader {
    layers: Vec<Layer>,
    env: Option<(String, String)>,
}

impl ConfigLoader {
    /// Create a loader with no layers.
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            env: None,
        }
    }

    /// Add a file layer. The format is detected from the extension
    /// (`.json`, `.yaml`, `.yml`, `.toml`).
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.layers.push(Layer::File(path.into()));
        self
    }

    /// Add an in-memory layer.
    pub fn with_str(mut self, contents: impl Into<String>, format: FileFormat) -> Self {
        self.layers.push(Layer::Inline(contents.into(), format));
        self
    }

    /// Apply environment variables with `prefix` and nested-key `separator`.
    pub fn with_env_overrides(mut self, prefix: &str, separator: &str) -> Self {
        self.env = Some((prefix.to_string(), separator.to_string()));
        self
    }

    /// Load and merge all layers into `T`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - No layers were added
    /// - A file is missing, has an unsupported extension, or does not parse
    /// - Deserialization into `T` fails
    pub fn load<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if self.layers.is_empty() && self.env.is_none() {
            return Err(MonitorError::Config(
                "No configuration sources specified".to_string(),
            ));
        }

        let mut builder = config::Config::builder();
        for layer in &self.layers {
            builder = match layer {
                Layer::File(path) => {
                    validate_extension(path)?;
                    builder.add_source(File::from(path.as_path()).required(true))
                }
                Layer::Inline(contents, format) => {
                    builder.add_source(File::from_str(contents, *format))
                }
            };
        }

        if let Some((prefix, separator)) = &self.env {
            builder = builder.add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("_")
                    .separator(separator)
                    .try_parsing(true),
            );
        }

        let config = builder
            .build()
            .map_err(|e| MonitorError::Config(format!("Failed to load configuration: {}", e)))?;

        config.try_deserialize::<T>().map_err(|e| {
            MonitorError::Config(format!("Failed to deserialize configuration: {}", e))
        })
    }

    /// Load a [`MonitorConfig`] and validate it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if loading or validation fails.
    pub fn load_monitor_config(&self) -> Result<MonitorConfig> {
        let config: MonitorConfig = self.load()?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_extension(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| {
            MonitorError::Config(format!(
                "Unable to determine file format for: {}",
                path.display()
            ))
        })?;

    match extension {
        "json" | "yaml" | "yml" | "toml" => Ok(()),
        _ => Err(MonitorError::Config(format!(
            "Unsupported file extension: {}. Supported: .json, .yaml, .yml, .toml",
            extension
        ))),
    }
}
