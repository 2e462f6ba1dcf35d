//! Elevation raster: ESRI ASCII grid loading, affine indexing, bounds-safe
//! sampling

use ndarray::Array2;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum RasterError {
    Io(std::io::Error),
    Parse(String),
}

impl From<std::io::Error> for RasterError {
    fn from(err: std::io::Error) -> Self {
        RasterError::Io(err)
    }
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterError::Io(e) => write!(f, "IO error: {}", e),
            RasterError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for RasterError {}

/// Affine transform between raster indices and projected coordinates,
/// with rasterio's component order:
///
/// ```text
/// x = a * col + b * row + c
/// y = d * col + e * row + f
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    /// Map (col, row) to projected (x, y).
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Inverse transform, mapping projected (x, y) to fractional
    /// (col, row). `None` for a degenerate (non-invertible) transform.
    pub fn inverse(&self) -> Option<AffineTransform> {
        let det = self.a * self.e - self.b * self.d;
        if det == 0.0 {
            return None;
        }
        Some(AffineTransform {
            a: self.e / det,
            b: -self.b / det,
            c: (self.b * self.f - self.e * self.c) / det,
            d: -self.d / det,
            e: self.a / det,
            f: (self.d * self.c - self.a * self.f) / det,
        })
    }
}

/// DEM loaded once at startup: grid values, index transform, CRS code.
///
/// Nodata cells hold NaN so missing elevation propagates like any other
/// missing value instead of a magic number.
#[derive(Debug)]
pub struct ElevationRaster {
    pub data: Array2<f32>,
    pub transform: AffineTransform,
    pub epsg: u32,
}

impl ElevationRaster {
    /// Load an ESRI ASCII grid (`ncols`/`nrows`/`xllcorner`/`yllcorner`/
    /// `cellsize`/`NODATA_value` header, rows north to south).
    pub fn from_ascii_grid(path: impl AsRef<Path>, epsg: u32) -> Result<Self, RasterError> {
        let text = fs::read_to_string(path)?;
        Self::parse_ascii_grid(&text, epsg)
    }

    fn parse_ascii_grid(text: &str, epsg: u32) -> Result<Self, RasterError> {
        let mut ncols: Option<usize> = None;
        let mut nrows: Option<usize> = None;
        let mut xll: Option<f64> = None;
        let mut yll: Option<f64> = None;
        let mut cell_centered = false;
        let mut cellsize: Option<f64> = None;
        let mut nodata: Option<f64> = None;

        let mut lines = text.lines();
        let mut values: Vec<f32> = Vec::new();

        for line in lines.by_ref() {
            let mut parts = line.split_whitespace();
            let key = match parts.next() {
                Some(k) => k,
                None => continue,
            };
            let value = parts.next().unwrap_or("");

            let parse_num = |v: &str| -> Result<f64, RasterError> {
                v.parse()
                    .map_err(|_| RasterError::Parse(format!("bad header value {:?} for {}", v, key)))
            };

            match key.to_ascii_lowercase().as_str() {
                "ncols" => ncols = Some(parse_num(value)? as usize),
                "nrows" => nrows = Some(parse_num(value)? as usize),
                "xllcorner" => xll = Some(parse_num(value)?),
                "yllcorner" => yll = Some(parse_num(value)?),
                "xllcenter" => {
                    xll = Some(parse_num(value)?);
                    cell_centered = true;
                }
                "yllcenter" => {
                    yll = Some(parse_num(value)?);
                    cell_centered = true;
                }
                "cellsize" => cellsize = Some(parse_num(value)?),
                "nodata_value" => nodata = Some(parse_num(value)?),
                _ => {
                    // First data row; headers are done.
                    Self::push_row(line, nodata, &mut values)?;
                    break;
                }
            }
        }

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            Self::push_row(line, nodata, &mut values)?;
        }

        let ncols = ncols.ok_or_else(|| RasterError::Parse("missing ncols".into()))?;
        let nrows = nrows.ok_or_else(|| RasterError::Parse("missing nrows".into()))?;
        let cellsize = cellsize.ok_or_else(|| RasterError::Parse("missing cellsize".into()))?;
        let mut xll = xll.ok_or_else(|| RasterError::Parse("missing xllcorner".into()))?;
        let mut yll = yll.ok_or_else(|| RasterError::Parse("missing yllcorner".into()))?;

        if cell_centered {
            xll -= cellsize / 2.0;
            yll -= cellsize / 2.0;
        }

        if values.len() != ncols * nrows {
            return Err(RasterError::Parse(format!(
                "expected {} values ({}x{}), found {}",
                ncols * nrows,
                nrows,
                ncols,
                values.len()
            )));
        }

        let data = Array2::from_shape_vec((nrows, ncols), values)
            .map_err(|e| RasterError::Parse(e.to_string()))?;

        // Row 0 is the northernmost line of the file.
        let transform = AffineTransform {
            a: cellsize,
            b: 0.0,
            c: xll,
            d: 0.0,
            e: -cellsize,
            f: yll + nrows as f64 * cellsize,
        };

        Ok(Self { data, transform, epsg })
    }

    fn push_row(line: &str, nodata: Option<f64>, out: &mut Vec<f32>) -> Result<(), RasterError> {
        for token in line.split_whitespace() {
            let v: f64 = token
                .parse()
                .map_err(|_| RasterError::Parse(format!("bad cell value {:?}", token)))?;
            let is_nodata = nodata.map(|nd| v == nd).unwrap_or(false);
            out.push(if is_nodata { f32::NAN } else { v as f32 });
        }
        Ok(())
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Elevation at a raster index. `None` for any index outside
    /// [0, height) x [0, width); never panics.
    pub fn sample(&self, row: i64, col: i64) -> Option<f32> {
        if row < 0 || col < 0 {
            return None;
        }
        self.data.get((row as usize, col as usize)).copied()
    }
}
