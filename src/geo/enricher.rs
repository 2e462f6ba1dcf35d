//! Elevation and time-field enrichment
//!
//! Takes resolved readings (geometry already joined on), projects all
//! site coordinates into the DEM's CRS in one batch, maps them through
//! the inverse affine transform to raster indices, and samples elevation
//! with bounds checking. Out-of-raster rows keep NaN elevation rather
//! than being dropped; every other field stays valid.

use super::projection::Projection;
use super::raster::ElevationRaster;
use crate::influx::Reading;
use crate::metadata::LinkMetadata;
use chrono::{Datelike, Timelike};

/// A reading joined with link geometry, elevation and derived time fields.
#[derive(Debug, Clone)]
pub struct EnrichedReading {
    pub reading: Reading,
    pub meta: LinkMetadata,
    /// DEM elevation at the site, NaN when the site falls outside the
    /// raster or on a nodata cell.
    pub elevation: f64,
    /// UTC hour of day.
    pub hour: u32,
    pub day_of_year: u32,
}

/// Enrich a batch of resolved readings.
pub fn enrich(
    rows: Vec<(Reading, LinkMetadata)>,
    raster: &ElevationRaster,
    projection: &Projection,
) -> Vec<EnrichedReading> {
    let lons: Vec<f64> = rows.iter().map(|(_, m)| m.longitude).collect();
    let lats: Vec<f64> = rows.iter().map(|(_, m)| m.latitude).collect();
    let (xs, ys) = projection.forward_batch(&lons, &lats);

    let inverse = raster.transform.inverse();
    if inverse.is_none() {
        log::error!("Elevation raster transform is not invertible; elevation disabled");
    }

    let mut out_of_bounds = 0usize;
    let enriched: Vec<EnrichedReading> = rows
        .into_iter()
        .zip(xs.into_iter().zip(ys))
        .map(|((reading, meta), (x, y))| {
            let elevation = match &inverse {
                Some(inv) => {
                    let (col_f, row_f) = inv.apply(x, y);
                    let (col, row) = (col_f.round() as i64, row_f.round() as i64);
                    match raster.sample(row, col) {
                        Some(v) => v as f64,
                        None => {
                            out_of_bounds += 1;
                            f64::NAN
                        }
                    }
                }
                None => f64::NAN,
            };

            let hour = reading.time.hour();
            let day_of_year = reading.time.ordinal();

            EnrichedReading {
                reading,
                meta,
                elevation,
                hour,
                day_of_year,
            }
        })
        .collect();

    if out_of_bounds > 0 {
        log::debug!("{} sites outside the elevation raster", out_of_bounds);
    }

    enriched
}
