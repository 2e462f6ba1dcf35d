//! Predictive model boundary and per-hour aggregation
//!
//! The model itself is an external collaborator: an opaque function from
//! a feature vector to a corrected air temperature, served over HTTP in
//! production. This module owns what surrounds it: the fixed feature
//! column order, request/response plumbing, and the collapse of raw
//! per-window predictions into one value per link side and hour.

use crate::geo::EnrichedReading;
use crate::metadata::Side;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Feature column order the model was trained with. Never reorder.
pub const FEATURE_ORDER: [&str; 10] = [
    "temperature_raw",
    "daylight",
    "hour",
    "day_of_year",
    "signal",
    "azimuth",
    "latitude",
    "longitude",
    "technology",
    "elevation",
];

pub type FeatureVector = [f64; 10];

/// Corrected temperature for one link side at one hour.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedReading {
    /// Start of the hour the value represents.
    pub time: DateTime<Utc>,
    pub hour: u32,
    pub device: String,
    pub link_id: i64,
    pub side: Side,
    pub latitude: f64,
    pub longitude: f64,
    pub technology: i64,
    pub elevation: f64,
    pub predicted_temperature: f64,
}

#[derive(Debug)]
pub enum PredictError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    /// The service answered with a different number of predictions than
    /// rows submitted.
    LengthMismatch { expected: usize, actual: usize },
}

impl From<reqwest::Error> for PredictError {
    fn from(err: reqwest::Error) -> Self {
        PredictError::Http(err)
    }
}

impl fmt::Display for PredictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictError::Http(e) => write!(f, "HTTP error: {}", e),
            PredictError::Api { status, body } => write!(f, "API error {}: {}", status, body),
            PredictError::LengthMismatch { expected, actual } => {
                write!(f, "expected {} predictions, got {}", expected, actual)
            }
        }
    }
}

impl std::error::Error for PredictError {}

/// External temperature-correction model.
#[async_trait]
pub trait TemperaturePredictor: Send + Sync {
    /// One corrected temperature per input row, in input order.
    async fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PredictError>;
}

/// Model service client (TensorFlow-Serving request shape).
pub struct HttpPredictor {
    http: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: &'a [FeatureVector],
}

#[derive(Deserialize)]
struct PredictResponse {
    predictions: Vec<f64>,
}

impl HttpPredictor {
    pub fn new(cfg: &crate::config::ModelConfig) -> Result<Self, PredictError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
        })
    }
}

#[async_trait]
impl TemperaturePredictor for HttpPredictor {
    async fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
        let response = self
            .http
            .post(&self.url)
            .json(&PredictRequest { instances: features })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: PredictResponse = response.json().await?;
        if body.predictions.len() != features.len() {
            return Err(PredictError::LengthMismatch {
                expected: features.len(),
                actual: body.predictions.len(),
            });
        }

        Ok(body.predictions)
    }
}

/// Assemble one feature vector per row in `FEATURE_ORDER`. Missing
/// optional inputs become NaN; imputation belongs to the model service.
pub fn build_features(rows: &[EnrichedReading]) -> Vec<FeatureVector> {
    rows.iter()
        .map(|row| {
            [
                row.reading.temperature_raw.unwrap_or(f64::NAN),
                row.reading.daylight as f64,
                row.hour as f64,
                row.day_of_year as f64,
                row.reading.signal.unwrap_or(f64::NAN),
                row.meta.azimuth,
                row.meta.latitude,
                row.meta.longitude,
                row.meta.technology as f64,
                row.elevation,
            ]
        })
        .collect()
}

/// Run the model over a batch and collapse the per-window predictions to
/// one `PredictedReading` per (device, link, side) and hour: the median,
/// stamped with the hour start.
pub async fn predict_and_aggregate(
    predictor: &dyn TemperaturePredictor,
    rows: &[EnrichedReading],
) -> Result<Vec<PredictedReading>, PredictError> {
    let features = build_features(rows);
    let predictions = predictor.predict(&features).await?;
    Ok(aggregate_median(rows, &predictions))
}

/// Group key fields are sortable so the output ordering is deterministic.
type GroupKey = (i64, String, i64, char);

fn aggregate_median(rows: &[EnrichedReading], predictions: &[f64]) -> Vec<PredictedReading> {
    let mut groups: BTreeMap<GroupKey, (Vec<f64>, &EnrichedReading)> = BTreeMap::new();

    for (row, &pred) in rows.iter().zip(predictions) {
        let hour_ts = truncate_to_hour(row.reading.time);
        let key = (
            hour_ts,
            row.reading.device.clone(),
            row.meta.link_id,
            match row.meta.side {
                Side::A => 'A',
                Side::B => 'B',
            },
        );
        groups.entry(key).or_insert_with(|| (Vec::new(), row)).0.push(pred);
    }

    groups
        .into_iter()
        .map(|((hour_ts, device, link_id, _), (mut values, row))| {
            let time = Utc
                .timestamp_opt(hour_ts, 0)
                .single()
                .unwrap_or(row.reading.time);
            PredictedReading {
                time,
                hour: row.hour,
                device,
                link_id,
                side: row.meta.side,
                latitude: row.meta.latitude,
                longitude: row.meta.longitude,
                technology: row.meta.technology,
                elevation: row.elevation,
                predicted_temperature: median(&mut values),
            }
        })
        .collect()
}

fn truncate_to_hour(t: DateTime<Utc>) -> i64 {
    let secs = t.timestamp();
    secs - secs.rem_euclid(3600)
}

/// Median with even-count mean-of-middles semantics.
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}
