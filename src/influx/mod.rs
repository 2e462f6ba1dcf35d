//! InfluxDB v2 access: HTTP client, telemetry read path, prediction
//! write-back

pub mod client;
pub mod reader;
pub mod writer;

pub use client::{InfluxClient, InfluxError};
pub use reader::{Reading, TelemetryReader, TelemetrySource};
pub use writer::{PredictionSink, PredictionWriter, SkipReason, WriterError};
