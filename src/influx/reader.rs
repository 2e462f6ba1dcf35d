//! Windowed telemetry read: Flux query, long-to-wide pivot, daylight tag
//!
//! The read side never fails a round. Any query or reshape problem is
//! logged and surfaces as an empty batch, which the orchestrator treats
//! as "nothing to do this hour".

use super::client::{InfluxClient, InfluxError};
use crate::config::{InfluxReadConfig, LocationConfig};
use crate::solar;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// One wide row of raw telemetry: a device at one aggregation window.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub time: DateTime<Utc>,
    pub unix: i64,
    pub device: String,
    /// Raw radio-unit temperature, if the window had that field.
    pub temperature_raw: Option<f64>,
    /// Received signal level, if the window had that field.
    pub signal: Option<f64>,
    /// 1 during the configured location's daylight, 0 otherwise.
    pub daylight: u8,
}

/// Source of raw telemetry batches. The production implementation reads
/// InfluxDB; tests substitute canned batches.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Fetch this round's batch. Must not fail: degraded sources return
    /// an empty batch.
    async fn fetch(&self) -> Vec<Reading>;
}

pub struct TelemetryReader {
    client: InfluxClient,
    cfg: InfluxReadConfig,
    location: LocationConfig,
}

/// One record of the long-format query result.
#[derive(Debug, Clone)]
struct LongRecord {
    time: DateTime<Utc>,
    field: String,
    value: f64,
    device: String,
}

impl TelemetryReader {
    pub fn new(client: InfluxClient, cfg: InfluxReadConfig, location: LocationConfig) -> Self {
        Self { client, cfg, location }
    }

    async fn try_fetch(&self) -> Result<Vec<Reading>, InfluxError> {
        let flux = build_flux(&self.cfg);
        let body = self.client.query_raw(&flux).await?;

        let records = parse_annotated_csv(&body, &self.cfg.tag_device)?;
        if records.is_empty() {
            log::info!("Influx returned no data.");
            return Ok(Vec::new());
        }

        Ok(pivot(records, &self.cfg, &self.location))
    }
}

#[async_trait]
impl TelemetrySource for TelemetryReader {
    async fn fetch(&self) -> Vec<Reading> {
        match self.try_fetch().await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Influx read failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Build the windowed-aggregation Flux query: configured bucket and range,
/// measurement/field disjunctions, per-window mean, grouped by
/// measurement, field and device tag.
fn build_flux(cfg: &InfluxReadConfig) -> String {
    let meas_filter = cfg
        .measurements
        .iter()
        .map(|m| format!("r[\"_measurement\"] == \"{}\"", m))
        .collect::<Vec<_>>()
        .join(" or ");
    let fields_filter = cfg
        .fields
        .iter()
        .map(|f| format!("r[\"_field\"] == \"{}\"", f))
        .collect::<Vec<_>>()
        .join(" or ");

    format!(
        "from(bucket: \"{bucket}\")\n  \
         |> range(start: {range})\n  \
         |> filter(fn: (r) => {meas})\n  \
         |> filter(fn: (r) => {fields})\n  \
         |> aggregateWindow(every: {window}, fn: mean)\n  \
         |> group(columns: [\"_measurement\", \"_field\", \"{device_tag}\"])",
        bucket = cfg.bucket,
        range = cfg.range,
        meas = meas_filter,
        fields = fields_filter,
        window = cfg.window,
        device_tag = cfg.tag_device,
    )
}

/// Column positions within the current annotated-CSV table chunk.
struct Indices {
    time: usize,
    value: usize,
    field: usize,
    device: Option<usize>,
}

/// Parse an annotated-CSV query response into long records.
///
/// Annotation rows (`#group`, `#datatype`, `#default`) are skipped, header
/// rows re-detected per table chunk, and records with an empty `_value`
/// (windows with no samples) dropped. A malformed data row is skipped,
/// not fatal.
fn parse_annotated_csv(body: &str, device_tag: &str) -> Result<Vec<LongRecord>, InfluxError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut indices: Option<Indices> = None;
    let mut records = Vec::new();

    for result in rdr.records() {
        let rec = result.map_err(|e| InfluxError::Csv(e.to_string()))?;

        let first = rec.get(0).unwrap_or("");
        if first.starts_with('#') {
            continue;
        }
        if rec.iter().all(|f| f.is_empty()) {
            // Blank separator between result tables.
            indices = None;
            continue;
        }

        let is_header = rec.iter().any(|f| f == "_time") && rec.iter().any(|f| f == "_value");
        if is_header {
            let find = |name: &str| rec.iter().position(|f| f == name);
            indices = Some(Indices {
                time: find("_time")
                    .ok_or_else(|| InfluxError::Csv("header without _time".into()))?,
                value: find("_value")
                    .ok_or_else(|| InfluxError::Csv("header without _value".into()))?,
                field: find("_field")
                    .ok_or_else(|| InfluxError::Csv("header without _field".into()))?,
                device: find(device_tag),
            });
            continue;
        }

        let ix = match &indices {
            Some(ix) => ix,
            None => continue,
        };

        let value_raw = rec.get(ix.value).unwrap_or("");
        if value_raw.is_empty() {
            continue;
        }

        let device = match ix.device.and_then(|i| rec.get(i)) {
            Some(d) => d.to_string(),
            None => {
                log::debug!("Skipping record without device tag {:?}", device_tag);
                continue;
            }
        };

        let time_raw = rec.get(ix.time).unwrap_or("");
        let time = match DateTime::parse_from_rfc3339(time_raw) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                log::debug!("Skipping record with bad _time {:?}: {}", time_raw, e);
                continue;
            }
        };
        let value: f64 = match value_raw.parse() {
            Ok(v) => v,
            Err(e) => {
                log::debug!("Skipping record with bad _value {:?}: {}", value_raw, e);
                continue;
            }
        };
        let field = rec.get(ix.field).unwrap_or("").to_string();

        records.push(LongRecord { time, field, value, device });
    }

    Ok(records)
}

/// Reshape long records into one row per (time, device), one column per
/// field, with the configured raw-temperature/signal fields renamed to
/// their canonical columns and the daylight indicator attached.
fn pivot(records: Vec<LongRecord>, cfg: &InfluxReadConfig, loc: &LocationConfig) -> Vec<Reading> {
    // (time, device) -> field -> (sum, count); duplicate cells average.
    let mut table: BTreeMap<(DateTime<Utc>, String), HashMap<String, (f64, u32)>> =
        BTreeMap::new();

    for rec in records {
        let cell = table
            .entry((rec.time, rec.device))
            .or_default()
            .entry(rec.field)
            .or_insert((0.0, 0));
        cell.0 += rec.value;
        cell.1 += 1;
    }

    let mut daylight_memo: HashMap<i64, u8> = HashMap::new();
    let mut rows = Vec::with_capacity(table.len());

    for ((time, device), fields) in table {
        let mean_of = |name: &str| -> Option<f64> {
            fields.get(name).map(|(sum, count)| sum / *count as f64)
        };

        let daylight = *daylight_memo.entry(time.timestamp()).or_insert_with(|| {
            solar::is_daylight(time, loc.lat, loc.lng, loc.utc_offset_min)
        });

        rows.push(Reading {
            time,
            unix: time.timestamp(),
            device,
            temperature_raw: mean_of(&cfg.field_temperature),
            signal: mean_of(&cfg.field_signal),
            daylight,
        });
    }

    rows
}
