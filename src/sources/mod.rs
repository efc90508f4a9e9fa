//! Data source adapters.

mod data_source;
mod memory;

#[cfg(feature = "influxdb")]
mod influx;

pub use data_source::DataSource;
pub use memory::MemorySource;

#[cfg(feature = "influxdb")]
pub use influx::{InfluxSource, InfluxSourceBuilder};
