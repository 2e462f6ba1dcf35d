//! Geospatial enrichment: DEM raster access, coordinate reprojection,
//! and the elevation/time-field enrichment pass

pub mod enricher;
pub mod projection;
pub mod raster;

pub use enricher::{enrich, EnrichedReading};
pub use projection::Projection;
pub use raster::{AffineTransform, ElevationRaster, RasterError};
