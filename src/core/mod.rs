//! Core monitoring types: configuration, change detection, scheduling, and
//! the monitor itself.

mod config;
mod detector;
mod loader;
mod monitor;
mod scheduler;
mod validation;

pub use config::{
    HttpConfig, InfluxConfig, MonitorConfig, MqttClientOptions, MqttConfig, StateConfig,
};
pub use detector::{ChangeDetector, Clock, Evaluation};
pub use loader::{ConfigLoader, ENV_PREFIX, ENV_SEPARATOR};
pub use monitor::{CycleReport, Monitor, MonitorBuilder, Phase};
pub use scheduler::{Scheduler, SkipHook};
pub use validation::Validate;
