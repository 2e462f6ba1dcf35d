//! Persistence of interpolated grid surfaces
//!
//! The map renderer is a separate consumer; this service only drops each
//! round's grid into the saved-grids directory, one CSV per hour, named
//! by the round's timestamp ceiled to the hour.

use crate::interpolation::GridSurface;
use chrono::{DateTime, TimeZone, Utc};
use std::error::Error;
use std::fs;
use std::path::PathBuf;

pub trait SurfaceSink: Send + Sync {
    fn save(&self, surface: &GridSurface, name: &str) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Writes each surface as a CSV matrix (one record per grid row).
pub struct CsvSurfaceSink {
    dir: PathBuf,
}

impl CsvSurfaceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SurfaceSink for CsvSurfaceSink {
    fn save(&self, surface: &GridSurface, name: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);

        let mut writer = csv::Writer::from_path(&path)?;
        for row in surface.values.rows() {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        writer.flush()?;

        log::info!("Saved grid surface to {}", path.display());
        Ok(())
    }
}

/// File name for a round's surface: the first reading's timestamp ceiled
/// to the hour, `YYYY-MM-DD_HHMM.csv`.
pub fn grid_name(first_time: DateTime<Utc>) -> String {
    format!("{}.csv", ceil_hour(first_time).format("%Y-%m-%d_%H%M"))
}

/// Round a timestamp up to the next hour boundary; a timestamp already on
/// the boundary is unchanged.
pub fn ceil_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp();
    let rem = secs.rem_euclid(3600);
    let sub = t.timestamp_subsec_nanos();
    let ceiled = if rem == 0 && sub == 0 {
        secs
    } else {
        secs - rem + 3600
    };
    Utc.timestamp_opt(ceiled, 0).single().unwrap_or(t)
}
