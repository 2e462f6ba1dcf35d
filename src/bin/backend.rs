//! Hourly backend service entrypoint
//!
//! Loads configuration, opens the metadata store and the DEM once, wires
//! the pipeline and runs the processing loop forever.

use telcotherm::config::Config;
use telcotherm::geo::{ElevationRaster, Projection};
use telcotherm::influx::{InfluxClient, PredictionWriter, TelemetryReader};
use telcotherm::interpolation::HttpInterpolator;
use telcotherm::metadata::MetadataResolver;
use telcotherm::model::HttpPredictor;
use telcotherm::pipeline::{self, Pipeline};
use telcotherm::surface::CsvSurfaceSink;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Configuration problems are fatal before anything else starts.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Write logs to stderr so a supervisor can capture and rotate them.
    let mut builder = if config.rust_log.is_some() {
        env_logger::Builder::from_default_env()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    };
    builder.target(env_logger::Target::Stderr).init();

    // NOTE: Workaround for rustls issue
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Can't set crypto provider to aws_lc_rs");

    log::info!("🚀 Starting telcotherm backend...");
    log::info!("📊 Configuration:");
    log::info!("   Influx URL: {}", config.influx.url);
    log::info!(
        "   Read: bucket='{}' measurements={:?} window={} range={}",
        config.influx_read.bucket,
        config.influx_read.measurements,
        config.influx_read.window,
        config.influx_read.range
    );
    log::info!(
        "   Write: bucket='{}' measurement='{}'",
        config.influx_write.bucket,
        config.influx_write.measurement
    );
    log::info!("   Metadata DB: {}", config.metadata_db.db_path);
    log::info!(
        "   DEM: {} (EPSG:{})",
        config.dem.grid_path,
        config.dem.epsg
    );

    // Startup assets: loaded once, fatal when broken.
    let raster = ElevationRaster::from_ascii_grid(&config.dem.grid_path, config.dem.epsg)?;
    log::info!(
        "Loaded elevation raster: {}x{} cells",
        raster.height(),
        raster.width()
    );

    let projection = Projection::from_epsg(config.dem.epsg)
        .ok_or_else(|| format!("unsupported DEM EPSG code: {}", config.dem.epsg))?;

    let resolver = MetadataResolver::open(&config.metadata_db.db_path)?;

    let client = InfluxClient::new(&config.influx)?;
    let reader = TelemetryReader::new(
        client.clone(),
        config.influx_read.clone(),
        config.location.clone(),
    );
    let writer = PredictionWriter::new(client, config.influx_write.clone());
    let predictor = HttpPredictor::new(&config.model)?;
    let interpolator = HttpInterpolator::new(config.interpolation.clone())?;
    let surface_sink = CsvSurfaceSink::new(config.paths.saved_grids_dir.clone());

    let mut pipeline = Pipeline::new(
        resolver,
        Box::new(reader),
        Box::new(predictor),
        Box::new(interpolator),
        Box::new(writer),
        Box::new(surface_sink),
        raster,
        projection,
        config.grid.clone(),
    );

    log::info!("✅ Backend processing started");
    pipeline::run_forever(&mut pipeline).await;

    Ok(())
}
