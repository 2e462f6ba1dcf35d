//! Configuration loaded from environment variables
//!
//! One typed struct per domain (paths, metadata store, influx read/write,
//! grid, interpolation, model, location, DEM). Optional settings carry an
//! explicit default; required settings fail `from_env` so the service
//! refuses to start with a half-formed configuration.

use std::env;
use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    MissingVar(&'static str),
    /// A variable is present but cannot be parsed into its target type.
    InvalidVar(&'static str, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingVar(name) => write!(f, "missing required variable: {}", name),
            ConfigError::InvalidVar(name, value) => {
                write!(f, "invalid value for {}: {:?}", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// File-system locations used by the service.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub saved_grids_dir: String,
}

/// Digital elevation model input.
#[derive(Debug, Clone)]
pub struct DemConfig {
    /// ESRI ASCII grid with the elevation raster.
    pub grid_path: String,
    /// EPSG code of the raster's coordinate reference system.
    pub epsg: u32,
}

/// Relational store holding link/site reference data.
#[derive(Debug, Clone)]
pub struct MetadataDbConfig {
    pub db_path: String,
}

/// Connection settings shared by the Influx read and write sides.
#[derive(Debug, Clone)]
pub struct InfluxCommonConfig {
    pub url: String,
    pub org: String,
    pub token: String,
}

/// Parameters of the raw-telemetry read query.
#[derive(Debug, Clone)]
pub struct InfluxReadConfig {
    pub bucket: String,
    pub measurements: Vec<String>,
    pub fields: Vec<String>,
    pub tag_device: String,
    pub field_temperature: String,
    pub field_signal: String,
    pub window: String,
    pub range: String,
}

/// Parameters of the corrected-temperature write-back.
#[derive(Debug, Clone)]
pub struct InfluxWriteConfig {
    pub bucket: String,
    pub measurement: String,
    pub tag_cml_id: String,
    pub tag_side: String,
    pub field_temperature: String,
}

/// Target grid for the interpolated surface.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub x_points: usize,
    pub y_points: usize,
    /// (min_lon, min_lat, max_lon, max_lat)
    pub bounds: (f64, f64, f64, f64),
}

/// Parameters forwarded to the external interpolation service.
#[derive(Debug, Clone)]
pub struct InterpolationConfig {
    pub url: String,
    pub variogram_model: String,
    pub nlags: u32,
    pub regression_model: String,
}

/// External predictive model service.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub url: String,
}

/// Observation location for the daylight indicator.
#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub lat: f64,
    pub lng: f64,
    /// Fixed offset of local civil time from UTC, in minutes. Used only to
    /// pick the local calendar date whose sunrise/sunset interval applies.
    pub utc_offset_min: i32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub paths: PathsConfig,
    pub dem: DemConfig,
    pub metadata_db: MetadataDbConfig,
    pub influx: InfluxCommonConfig,
    pub influx_read: InfluxReadConfig,
    pub influx_write: InfluxWriteConfig,
    pub grid: GridConfig,
    pub interpolation: InterpolationConfig,
    pub model: ModelConfig,
    pub location: LocationConfig,
    pub rust_log: Option<String>,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

fn optional(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = optional(name, default);
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidVar(name, raw))
}

/// Comma-separated list, whitespace-trimmed, empty entries dropped.
fn list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_bounds(name: &'static str, default: &str) -> Result<(f64, f64, f64, f64), ConfigError> {
    let raw = optional(name, default);
    let parts: Vec<f64> = raw
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ConfigError::InvalidVar(name, raw.clone()))?;
    if parts.len() != 4 {
        return Err(ConfigError::InvalidVar(name, raw));
    }
    Ok((parts[0], parts[1], parts[2], parts[3]))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required: INFLUX_URL, INFLUX_TOKEN, INFLUX_ORG,
    /// INFLUX_READ_MEASUREMENTS, METADATA_DB_PATH, DEM_GRID_PATH.
    /// Everything else has a documented default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let measurements = list(&required("INFLUX_READ_MEASUREMENTS")?);
        if measurements.is_empty() {
            return Err(ConfigError::MissingVar("INFLUX_READ_MEASUREMENTS"));
        }

        let field_temperature = optional("INFLUX_READ_FIELD_TEMPERATURE", "Teplota");
        let field_signal = optional("INFLUX_READ_FIELD_SIGNAL", "PrijimanaUroven");
        let default_fields = format!("{},{}", field_temperature, field_signal);
        let fields = list(&optional("INFLUX_READ_FIELDS", &default_fields));

        Ok(Self {
            paths: PathsConfig {
                saved_grids_dir: optional("SAVED_GRIDS_DIR", "saved_grids"),
            },
            dem: DemConfig {
                grid_path: required("DEM_GRID_PATH")?,
                epsg: parse("DEM_EPSG", "32633")?,
            },
            metadata_db: MetadataDbConfig {
                db_path: required("METADATA_DB_PATH")?,
            },
            influx: InfluxCommonConfig {
                url: required("INFLUX_URL")?,
                org: required("INFLUX_ORG")?,
                token: required("INFLUX_TOKEN")?,
            },
            influx_read: InfluxReadConfig {
                bucket: optional("INFLUX_READ_BUCKET", "realtime_cbl"),
                measurements,
                fields,
                tag_device: optional("INFLUX_READ_TAG_DEVICE", "agent_host"),
                field_temperature,
                field_signal,
                window: optional("INFLUX_READ_WINDOW", "1m"),
                range: optional("INFLUX_READ_RANGE", "-1m"),
            },
            influx_write: InfluxWriteConfig {
                bucket: optional("INFLUX_WRITE_BUCKET", "telcorain_output"),
                measurement: optional("INFLUX_WRITE_MEASUREMENT", "telcorain"),
                tag_cml_id: optional("INFLUX_WRITE_TAG_CML_ID", "cml_id"),
                tag_side: optional("INFLUX_WRITE_TAG_SIDE", "side"),
                field_temperature: optional("INFLUX_WRITE_FIELD_TEMPERATURE", "temperature"),
            },
            grid: GridConfig {
                x_points: parse("GRID_X_POINTS", "500")?,
                y_points: parse("GRID_Y_POINTS", "500")?,
                bounds: parse_bounds("GRID_BOUNDS", "12.09,48.55,18.86,51.06")?,
            },
            interpolation: InterpolationConfig {
                url: optional("INTERPOLATOR_URL", "http://127.0.0.1:8600/interpolate"),
                variogram_model: optional("INTERP_VARIOGRAM_MODEL", "spherical"),
                nlags: parse("INTERP_NLAGS", "40")?,
                regression_model: optional("INTERP_REGRESSION_MODEL", "linear"),
            },
            model: ModelConfig {
                url: optional(
                    "MODEL_URL",
                    "http://127.0.0.1:8501/v1/models/temperature:predict",
                ),
            },
            location: LocationConfig {
                lat: parse("LOCATION_LAT", "49.8175")?,
                lng: parse("LOCATION_LNG", "15.4730")?,
                utc_offset_min: parse("LOCATION_UTC_OFFSET_MIN", "60")?,
            },
            rust_log: env::var("RUST_LOG").ok(),
        })
    }
}
