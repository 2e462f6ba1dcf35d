//! One processing round, stage by stage
//!
//! The round is an explicit state machine:
//!
//! ```text
//! Idle -> Reading -> Resolving -> Enriching -> Predicting
//!      -> Interpolating -> Writing -> Rendering -> Idle
//! ```
//!
//! `run_round` walks the stages in order and maps any stage failure into
//! a `RoundError` carrying the stage it died in. The caller logs it and
//! waits for the next trigger: failure isolation is structural, not an
//! accident of catch blocks. Everything round-scoped is dropped when the
//! function returns; the only state that survives is the resolver cache.

use crate::config::GridConfig;
use crate::geo::{self, ElevationRaster, Projection};
use crate::influx::{Reading, TelemetrySource, WriterError};
use crate::interpolation::{self, SpatialInterpolator};
use crate::metadata::{LinkMetadata, MetadataResolver};
use crate::model::{self, TemperaturePredictor};
use crate::surface::{self, SurfaceSink};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStage {
    Idle,
    Reading,
    Resolving,
    Enriching,
    Predicting,
    Interpolating,
    Writing,
    Rendering,
}

impl RoundStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStage::Idle => "idle",
            RoundStage::Reading => "reading",
            RoundStage::Resolving => "resolving",
            RoundStage::Enriching => "enriching",
            RoundStage::Predicting => "predicting",
            RoundStage::Interpolating => "interpolating",
            RoundStage::Writing => "writing",
            RoundStage::Rendering => "rendering",
        }
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A round failure, pinned to the stage it happened in.
#[derive(Debug)]
pub struct RoundError {
    pub stage: RoundStage,
    pub source: Box<dyn Error + Send + Sync>,
}

impl RoundError {
    fn new(stage: RoundStage, source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            stage,
            source: Box::new(source),
        }
    }
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round failed during {}: {}", self.stage, self.source)
    }
}

impl Error for RoundError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// What one round accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub rows_read: usize,
    pub rows_resolved: usize,
    pub rows_predicted: usize,
    pub points_written: usize,
    pub grid_saved: bool,
}

/// The wired-up hourly pipeline. Owns the resolver cache for the life of
/// the process; every other field is a collaborator boundary.
pub struct Pipeline {
    resolver: MetadataResolver,
    source: Box<dyn TelemetrySource>,
    predictor: Box<dyn TemperaturePredictor>,
    interpolator: Box<dyn SpatialInterpolator>,
    sink: Box<dyn crate::influx::PredictionSink>,
    surface_sink: Box<dyn SurfaceSink>,
    raster: ElevationRaster,
    projection: Projection,
    grid: GridConfig,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: MetadataResolver,
        source: Box<dyn TelemetrySource>,
        predictor: Box<dyn TemperaturePredictor>,
        interpolator: Box<dyn SpatialInterpolator>,
        sink: Box<dyn crate::influx::PredictionSink>,
        surface_sink: Box<dyn SurfaceSink>,
        raster: ElevationRaster,
        projection: Projection,
        grid: GridConfig,
    ) -> Self {
        Self {
            resolver,
            source,
            predictor,
            interpolator,
            sink,
            surface_sink,
            raster,
            projection,
            grid,
        }
    }

    /// Run one complete round. An `Err` means this hour's output is
    /// degraded or missing; it never poisons the next round.
    pub async fn run_round(&mut self) -> Result<RoundSummary, RoundError> {
        let mut summary = RoundSummary::default();

        // Reading. The source degrades to an empty batch on its own
        // failures, so an empty read is a quiet no-op round.
        let readings = self.source.fetch().await;
        summary.rows_read = readings.len();
        if readings.is_empty() {
            log::info!("No telemetry this round; nothing to do.");
            return Ok(summary);
        }
        let first_time = readings[0].time;

        // Resolving. Unresolved devices drop their rows here.
        let devices: Vec<String> = readings.iter().map(|r| r.device.clone()).collect();
        let (metas, _stats) = self.resolver.resolve(&devices);
        let resolved: Vec<(Reading, LinkMetadata)> = readings
            .into_iter()
            .zip(metas)
            .filter_map(|(reading, meta)| meta.map(|m| (reading, m)))
            .collect();
        summary.rows_resolved = resolved.len();
        if resolved.is_empty() {
            log::warn!("No readings with link metadata this round; nothing to do.");
            return Ok(summary);
        }

        // Enriching never fails: out-of-raster rows carry NaN elevation.
        let enriched = geo::enrich(resolved, &self.raster, &self.projection);

        // Predicting.
        let predicted = model::predict_and_aggregate(self.predictor.as_ref(), &enriched)
            .await
            .map_err(|e| RoundError::new(RoundStage::Predicting, e))?;
        summary.rows_predicted = predicted.len();

        // Interpolating.
        let points = interpolation::sample_points(&predicted);
        let grid_surface = self
            .interpolator
            .interpolate(&points, &self.grid)
            .await
            .map_err(|e| RoundError::new(RoundStage::Interpolating, e))?;

        // Writing. An all-skipped batch is reported but does not fail the
        // round; a transport failure does.
        summary.points_written = match self.sink.write(&predicted).await {
            Ok(written) => written,
            Err(WriterError::NoPoints { skipped }) => {
                log::error!("No points written this round ({} rows skipped).", skipped);
                0
            }
            Err(e) => return Err(RoundError::new(RoundStage::Writing, e)),
        };

        // Rendering hand-off: persist the surface for the map renderer.
        let name = surface::grid_name(first_time);
        self.surface_sink
            .save(&grid_surface, &name)
            .map_err(|e| RoundError {
                stage: RoundStage::Rendering,
                source: e,
            })?;
        summary.grid_saved = true;

        Ok(summary)
    }

    /// Relational queries issued by the resolver since startup.
    pub fn metadata_queries_issued(&self) -> u64 {
        self.resolver.queries_issued()
    }
}
