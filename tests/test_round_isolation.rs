//! Integration tests for round isolation: one hour's failure never stops
//! the loop, empty reads are quiet no-ops, and the metadata cache is the
//! only state that crosses rounds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array2;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use telcotherm::config::GridConfig;
use telcotherm::geo::{AffineTransform, ElevationRaster, Projection};
use telcotherm::influx::{InfluxError, PredictionSink, Reading, TelemetrySource, WriterError};
use telcotherm::interpolation::{
    GridExtent, GridSurface, InterpolationError, SamplePoint, SpatialInterpolator,
};
use telcotherm::metadata::MetadataResolver;
use telcotherm::model::{FeatureVector, PredictError, PredictedReading, TemperaturePredictor};
use telcotherm::pipeline::{Pipeline, RoundStage};
use telcotherm::surface::SurfaceSink;

/// Source yielding one pre-canned batch per round.
struct ScriptedSource {
    batches: Mutex<VecDeque<Vec<Reading>>>,
}

impl ScriptedSource {
    fn new(batches: Vec<Vec<Reading>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
        }
    }
}

#[async_trait]
impl TelemetrySource for ScriptedSource {
    async fn fetch(&self) -> Vec<Reading> {
        self.batches.lock().unwrap().pop_front().unwrap_or_default()
    }
}

struct CountingPredictor {
    calls: Arc<AtomicUsize>,
    /// Value every prediction gets; NaN simulates a degraded model.
    value: f64,
}

#[async_trait]
impl TemperaturePredictor for CountingPredictor {
    async fn predict(&self, features: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.value; features.len()])
    }
}

struct FailingPredictor;

#[async_trait]
impl TemperaturePredictor for FailingPredictor {
    async fn predict(&self, _features: &[FeatureVector]) -> Result<Vec<f64>, PredictError> {
        Err(PredictError::Api {
            status: 503,
            body: "model unavailable".to_string(),
        })
    }
}

struct FlatInterpolator;

#[async_trait]
impl SpatialInterpolator for FlatInterpolator {
    async fn interpolate(
        &self,
        points: &[SamplePoint],
        grid: &GridConfig,
    ) -> Result<GridSurface, InterpolationError> {
        let mean = if points.is_empty() {
            f64::NAN
        } else {
            points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64
        };
        let (x_min, y_min, x_max, y_max) = grid.bounds;
        Ok(GridSurface {
            values: Array2::from_elem((grid.y_points, grid.x_points), mean),
            extent: GridExtent { x_min, y_min, x_max, y_max },
        })
    }
}

struct CountingSink {
    written: Arc<AtomicUsize>,
    fail_transport: bool,
}

#[async_trait]
impl PredictionSink for CountingSink {
    async fn write(&self, rows: &[PredictedReading]) -> Result<usize, WriterError> {
        if self.fail_transport {
            return Err(WriterError::Transport(InfluxError::Api {
                status: 500,
                body: "store unreachable".to_string(),
            }));
        }
        let finite = rows
            .iter()
            .filter(|r| r.predicted_temperature.is_finite())
            .count();
        if finite == 0 {
            return Err(WriterError::NoPoints { skipped: rows.len() });
        }
        self.written.fetch_add(finite, Ordering::SeqCst);
        Ok(finite)
    }
}

struct NullSurfaceSink;

impl SurfaceSink for NullSurfaceSink {
    fn save(
        &self,
        _surface: &GridSurface,
        _name: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

fn metadata_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE links (
            id INTEGER PRIMARY KEY, technology INTEGER NOT NULL,
            ip_address_a TEXT NOT NULL, ip_address_b TEXT NOT NULL,
            site_a INTEGER NOT NULL, site_b INTEGER NOT NULL,
            azimuth_a REAL NOT NULL, azimuth_b REAL NOT NULL
        );
        CREATE TABLE sites (
            id INTEGER PRIMARY KEY, x_coordinate REAL NOT NULL, y_coordinate REAL NOT NULL
        );
        INSERT INTO sites VALUES (1, 11.3, 51.2), (2, 12.4, 50.6);
        INSERT INTO links VALUES (42, 7, '10.0.0.5', '10.0.0.6', 1, 2, 93.5, 273.5);
        "#,
    )
    .unwrap();
    conn
}

fn test_raster() -> ElevationRaster {
    ElevationRaster {
        data: Array2::from_elem((3, 4), 250.0),
        transform: AffineTransform {
            a: 1.0,
            b: 0.0,
            c: 10.0,
            d: 0.0,
            e: -1.0,
            f: 53.0,
        },
        epsg: 4326,
    }
}

fn grid_config() -> GridConfig {
    GridConfig {
        x_points: 4,
        y_points: 3,
        bounds: (10.0, 50.0, 14.0, 53.0),
    }
}

fn reading(time: DateTime<Utc>, device: &str, temperature: f64) -> Reading {
    Reading {
        time,
        unix: time.timestamp(),
        device: device.to_string(),
        temperature_raw: Some(temperature),
        signal: Some(-48.0),
        daylight: 1,
    }
}

fn t13() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap()
}

#[tokio::test]
async fn test_empty_read_is_a_quiet_no_op() {
    let calls = Arc::new(AtomicUsize::new(0));
    let written = Arc::new(AtomicUsize::new(0));

    let mut pipeline = Pipeline::new(
        MetadataResolver::new(metadata_db()),
        Box::new(ScriptedSource::new(vec![vec![]])),
        Box::new(CountingPredictor {
            calls: calls.clone(),
            value: 20.0,
        }),
        Box::new(FlatInterpolator),
        Box::new(CountingSink {
            written: written.clone(),
            fail_transport: false,
        }),
        Box::new(NullSurfaceSink),
        test_raster(),
        Projection::Geographic,
        grid_config(),
    );

    let summary = pipeline.run_round().await.unwrap();

    assert_eq!(summary.rows_read, 0);
    assert_eq!(summary.points_written, 0);
    assert!(!summary.grid_saved);
    // Later stages never ran.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(written.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_round_does_not_poison_the_next() {
    let mut pipeline = Pipeline::new(
        MetadataResolver::new(metadata_db()),
        Box::new(ScriptedSource::new(vec![
            vec![reading(t13(), "10.0.0.5", 21.0)],
            vec![],
        ])),
        Box::new(FailingPredictor),
        Box::new(FlatInterpolator),
        Box::new(CountingSink {
            written: Arc::new(AtomicUsize::new(0)),
            fail_transport: false,
        }),
        Box::new(NullSurfaceSink),
        test_raster(),
        Projection::Geographic,
        grid_config(),
    );

    // Hour 1: the model is down; the round fails in the predicting stage.
    let err = pipeline.run_round().await.unwrap_err();
    assert_eq!(err.stage, RoundStage::Predicting);
    assert!(err.to_string().contains("model unavailable"));

    // Hour 2: the loop proceeds normally on the same pipeline.
    let summary = pipeline.run_round().await.unwrap();
    assert_eq!(summary.rows_read, 0);
}

#[tokio::test]
async fn test_write_transport_failure_fails_round() {
    let mut pipeline = Pipeline::new(
        MetadataResolver::new(metadata_db()),
        Box::new(ScriptedSource::new(vec![vec![reading(
            t13(),
            "10.0.0.5",
            21.0,
        )]])),
        Box::new(CountingPredictor {
            calls: Arc::new(AtomicUsize::new(0)),
            value: 20.0,
        }),
        Box::new(FlatInterpolator),
        Box::new(CountingSink {
            written: Arc::new(AtomicUsize::new(0)),
            fail_transport: true,
        }),
        Box::new(NullSurfaceSink),
        test_raster(),
        Projection::Geographic,
        grid_config(),
    );

    let err = pipeline.run_round().await.unwrap_err();
    assert_eq!(err.stage, RoundStage::Writing);
}

#[tokio::test]
async fn test_all_skipped_write_is_reported_not_fatal() {
    // A model answering NaN for every row produces a batch with nothing
    // to write: the writer reports it, the round still completes and the
    // surface is still saved.
    let mut pipeline = Pipeline::new(
        MetadataResolver::new(metadata_db()),
        Box::new(ScriptedSource::new(vec![vec![reading(
            t13(),
            "10.0.0.5",
            21.0,
        )]])),
        Box::new(CountingPredictor {
            calls: Arc::new(AtomicUsize::new(0)),
            value: f64::NAN,
        }),
        Box::new(FlatInterpolator),
        Box::new(CountingSink {
            written: Arc::new(AtomicUsize::new(0)),
            fail_transport: false,
        }),
        Box::new(NullSurfaceSink),
        test_raster(),
        Projection::Geographic,
        grid_config(),
    );

    let summary = pipeline.run_round().await.unwrap();
    assert_eq!(summary.rows_predicted, 1);
    assert_eq!(summary.points_written, 0);
    assert!(summary.grid_saved);
}

#[tokio::test]
async fn test_metadata_cache_spans_rounds() {
    let mut pipeline = Pipeline::new(
        MetadataResolver::new(metadata_db()),
        Box::new(ScriptedSource::new(vec![
            vec![reading(t13(), "10.0.0.5", 21.0)],
            vec![reading(t13(), "10.0.0.5", 22.0)],
            vec![
                reading(t13(), "10.0.0.5", 23.0),
                reading(t13(), "10.0.0.6", 19.0),
            ],
        ])),
        Box::new(CountingPredictor {
            calls: Arc::new(AtomicUsize::new(0)),
            value: 20.0,
        }),
        Box::new(FlatInterpolator),
        Box::new(CountingSink {
            written: Arc::new(AtomicUsize::new(0)),
            fail_transport: false,
        }),
        Box::new(NullSurfaceSink),
        test_raster(),
        Projection::Geographic,
        grid_config(),
    );

    pipeline.run_round().await.unwrap();
    assert_eq!(pipeline.metadata_queries_issued(), 1);

    // Second round hits the cache only.
    pipeline.run_round().await.unwrap();
    assert_eq!(pipeline.metadata_queries_issued(), 1);

    // Third round has one genuinely new device: exactly one more query.
    pipeline.run_round().await.unwrap();
    assert_eq!(pipeline.metadata_queries_issued(), 2);
}
