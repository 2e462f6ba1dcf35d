//! telcotherm: hourly temperature-correction backend for commercial
//! microwave links
//!
//! Every hour the pipeline reads raw link telemetry from InfluxDB, joins
//! link/site metadata from the relational store (cached for the life of
//! the process), enriches rows with DEM elevation and time fields, gets
//! corrected temperatures from the external model service, interpolates
//! them over the configured region, writes the per-link values back to
//! InfluxDB and persists the interpolated surface. A failed hour is
//! logged and the loop keeps going.


pub mod config;
pub mod geo;
pub mod influx;
pub mod interpolation;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod solar;
pub mod surface;

pub use config::Config;
pub use pipeline::{Pipeline, RoundSummary};
