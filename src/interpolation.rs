//! Spatial interpolation boundary
//!
//! Interpolation (kriging with a regression trend in production) is an
//! external collaborator: scattered points in, dense grid out. This
//! module owns the boundary types and the HTTP client; the engine itself
//! lives behind the `SpatialInterpolator` trait so tests inject their
//! own.

use crate::config::{GridConfig, InterpolationConfig};
use crate::model::PredictedReading;
use async_trait::async_trait;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One scattered observation handed to the interpolator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplePoint {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Spatial extent of a grid surface: (x_min, y_min, x_max, y_max).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridExtent {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

/// Interpolated surface for one round; y rows, x columns.
#[derive(Debug, Clone)]
pub struct GridSurface {
    pub values: Array2<f64>,
    pub extent: GridExtent,
}

#[derive(Debug)]
pub enum InterpolationError {
    /// No finite input points; there is nothing to interpolate.
    NoPoints,
    Http(reqwest::Error),
    Api { status: u16, body: String },
    /// The service returned a grid of the wrong shape.
    Shape {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl From<reqwest::Error> for InterpolationError {
    fn from(err: reqwest::Error) -> Self {
        InterpolationError::Http(err)
    }
}

impl fmt::Display for InterpolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationError::NoPoints => write!(f, "no finite points to interpolate"),
            InterpolationError::Http(e) => write!(f, "HTTP error: {}", e),
            InterpolationError::Api { status, body } => {
                write!(f, "API error {}: {}", status, body)
            }
            InterpolationError::Shape { expected, actual } => write!(
                f,
                "expected a {}x{} grid, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
        }
    }
}

impl std::error::Error for InterpolationError {}

/// External interpolation engine.
#[async_trait]
pub trait SpatialInterpolator: Send + Sync {
    async fn interpolate(
        &self,
        points: &[SamplePoint],
        grid: &GridConfig,
    ) -> Result<GridSurface, InterpolationError>;
}

/// Interpolation service client.
pub struct HttpInterpolator {
    http: reqwest::Client,
    params: InterpolationConfig,
}

#[derive(Serialize)]
struct InterpolateRequest<'a> {
    points: &'a [SamplePoint],
    x_points: usize,
    y_points: usize,
    /// (min_lon, min_lat, max_lon, max_lat)
    bounds: [f64; 4],
    variogram_model: &'a str,
    nlags: u32,
    regression_model: &'a str,
}

#[derive(Deserialize)]
struct InterpolateResponse {
    values: Vec<Vec<f64>>,
    /// (x_min, y_min, x_max, y_max)
    extent: [f64; 4],
}

impl HttpInterpolator {
    pub fn new(params: InterpolationConfig) -> Result<Self, InterpolationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { http, params })
    }
}

#[async_trait]
impl SpatialInterpolator for HttpInterpolator {
    async fn interpolate(
        &self,
        points: &[SamplePoint],
        grid: &GridConfig,
    ) -> Result<GridSurface, InterpolationError> {
        if points.is_empty() {
            return Err(InterpolationError::NoPoints);
        }

        let (min_lon, min_lat, max_lon, max_lat) = grid.bounds;
        let request = InterpolateRequest {
            points,
            x_points: grid.x_points,
            y_points: grid.y_points,
            bounds: [min_lon, min_lat, max_lon, max_lat],
            variogram_model: &self.params.variogram_model,
            nlags: self.params.nlags,
            regression_model: &self.params.regression_model,
        };

        let response = self
            .http
            .post(&self.params.url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InterpolationError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: InterpolateResponse = response.json().await?;
        surface_from_rows(body.values, body.extent, (grid.y_points, grid.x_points))
    }
}

/// Validate the returned grid shape and pack it into an `Array2`.
fn surface_from_rows(
    rows: Vec<Vec<f64>>,
    extent: [f64; 4],
    expected: (usize, usize),
) -> Result<GridSurface, InterpolationError> {
    let actual_rows = rows.len();
    let actual_cols = rows.first().map(|r| r.len()).unwrap_or(0);
    if actual_rows != expected.0 || rows.iter().any(|r| r.len() != expected.1) {
        return Err(InterpolationError::Shape {
            expected,
            actual: (actual_rows, actual_cols),
        });
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let values = Array2::from_shape_vec(expected, flat).map_err(|_| InterpolationError::Shape {
        expected,
        actual: (actual_rows, actual_cols),
    })?;

    Ok(GridSurface {
        values,
        extent: GridExtent {
            x_min: extent[0],
            y_min: extent[1],
            x_max: extent[2],
            y_max: extent[3],
        },
    })
}

/// Scattered points for the interpolator: longitude/latitude plus the
/// corrected temperature, finite values only.
pub fn sample_points(rows: &[PredictedReading]) -> Vec<SamplePoint> {
    rows.iter()
        .filter(|r| r.predicted_temperature.is_finite())
        .map(|r| SamplePoint {
            x: r.longitude,
            y: r.latitude,
            value: r.predicted_temperature,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Side;
    use chrono::{TimeZone, Utc};

    fn make_predicted(lon: f64, lat: f64, value: f64) -> PredictedReading {
        PredictedReading {
            time: Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap(),
            hour: 13,
            device: "10.0.0.5".to_string(),
            link_id: 42,
            side: Side::A,
            latitude: lat,
            longitude: lon,
            technology: 7,
            elevation: 312.0,
            predicted_temperature: value,
        }
    }

    #[test]
    fn test_sample_points_skip_non_finite() {
        let rows = vec![
            make_predicted(14.42, 50.08, 21.5),
            make_predicted(16.61, 49.19, f64::NAN),
            make_predicted(15.00, 50.00, 19.0),
        ];

        let points = sample_points(&rows);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].x, 14.42);
        assert_eq!(points[0].y, 50.08);
        assert_eq!(points[0].value, 21.5);
    }

    #[test]
    fn test_surface_from_rows() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let surface = surface_from_rows(rows, [12.0, 48.5, 18.9, 51.1], (2, 3)).unwrap();

        assert_eq!(surface.values.shape(), &[2, 3]);
        assert_eq!(surface.values[[1, 2]], 6.0);
        assert_eq!(surface.extent.x_min, 12.0);
        assert_eq!(surface.extent.y_max, 51.1);
    }

    #[test]
    fn test_surface_shape_mismatch_rejected() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        let err = surface_from_rows(rows, [0.0, 0.0, 1.0, 1.0], (2, 2)).unwrap_err();
        assert!(matches!(err, InterpolationError::Shape { .. }));

        let rows = vec![vec![1.0, 2.0]];
        let err = surface_from_rows(rows, [0.0, 0.0, 1.0, 1.0], (2, 2)).unwrap_err();
        assert!(matches!(err, InterpolationError::Shape { .. }));
    }
}
