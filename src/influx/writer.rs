//! Prediction write-back: per-row line-protocol conversion with typed
//! skips, one batch write per round
//!
//! A malformed row never sinks the batch: it is counted and skipped.
//! Only a transport failure during the batch submit fails the round, and
//! the retry is simply the next scheduled hour.

use super::client::{InfluxClient, InfluxError};
use crate::config::InfluxWriteConfig;
use crate::model::PredictedReading;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Why one row was excluded from the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// Corrected temperature is NaN or infinite (e.g. the model saw a row
    /// with no elevation data).
    NonFiniteTemperature,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NonFiniteTemperature => "non-finite temperature",
        }
    }
}

#[derive(Debug)]
pub enum WriterError {
    /// Every row of the batch was skipped; nothing was written.
    NoPoints { skipped: usize },
    Transport(InfluxError),
}

impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterError::NoPoints { skipped } => {
                write!(f, "no points prepared for write ({} rows skipped)", skipped)
            }
            WriterError::Transport(e) => write!(f, "write transport error: {}", e),
        }
    }
}

impl std::error::Error for WriterError {}

/// Destination for corrected per-link temperatures. The production
/// implementation writes InfluxDB; tests substitute a capture buffer.
#[async_trait]
pub trait PredictionSink: Send + Sync {
    /// Write one batch, returning how many points were accepted.
    async fn write(&self, rows: &[PredictedReading]) -> Result<usize, WriterError>;
}

pub struct PredictionWriter {
    client: InfluxClient,
    cfg: InfluxWriteConfig,
}

impl PredictionWriter {
    pub fn new(client: InfluxClient, cfg: InfluxWriteConfig) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl PredictionSink for PredictionWriter {
    async fn write(&self, rows: &[PredictedReading]) -> Result<usize, WriterError> {
        let (lines, skipped) = convert_rows(rows, &self.cfg);

        if !skipped.is_empty() {
            let mut counts: HashMap<SkipReason, usize> = HashMap::new();
            for reason in &skipped {
                *counts.entry(*reason).or_insert(0) += 1;
            }
            for (reason, count) in counts {
                log::warn!("Skipped {} rows: {}", count, reason.as_str());
            }
        }

        if lines.is_empty() {
            return Err(WriterError::NoPoints { skipped: skipped.len() });
        }

        let written = lines.len();
        self.client
            .write_lines(&self.cfg.bucket, lines.join("\n"))
            .await
            .map_err(WriterError::Transport)?;

        log::info!(
            "Wrote {} points to InfluxDB (bucket='{}', measurement='{}').",
            written,
            self.cfg.bucket,
            self.cfg.measurement
        );

        Ok(written)
    }
}

/// Convert each row independently; the batch is whatever survived.
fn convert_rows(rows: &[PredictedReading], cfg: &InfluxWriteConfig) -> (Vec<String>, Vec<SkipReason>) {
    let mut lines = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();

    for row in rows {
        match to_line(row, cfg) {
            Ok(line) => lines.push(line),
            Err(reason) => {
                log::warn!(
                    "Skipping row (link {}, side {}): {}",
                    row.link_id,
                    row.side,
                    reason.as_str()
                );
                skipped.push(reason);
            }
        }
    }

    (lines, skipped)
}

/// One line-protocol point:
/// `measurement,cml_id=...,side=... temperature=... <unix seconds>`.
fn to_line(row: &PredictedReading, cfg: &InfluxWriteConfig) -> Result<String, SkipReason> {
    if !row.predicted_temperature.is_finite() {
        return Err(SkipReason::NonFiniteTemperature);
    }

    Ok(format!(
        "{},{}={},{}={} {}={} {}",
        escape_measurement(&cfg.measurement),
        escape_tag(&cfg.tag_cml_id),
        escape_tag(&row.link_id.to_string()),
        escape_tag(&cfg.tag_side),
        escape_tag(row.side.as_str()),
        escape_tag(&cfg.field_temperature),
        row.predicted_temperature,
        row.time.timestamp(),
    ))
}

/// Escape a measurement name (commas and spaces).
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value or field key (commas, equals, spaces).
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
