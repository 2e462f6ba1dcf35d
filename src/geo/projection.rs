//! Geographic to raster-CRS coordinate transforms
//!
//! The DEM ships in a projected CRS (UTM by default) while link sites are
//! stored as WGS84 longitude/latitude. The forward transform here is the
//! standard ellipsoidal transverse Mercator series (Snyder, Map
//! Projections: A Working Manual, eq. 8-9..8-15), accurate to well under
//! a meter inside a UTM zone: raster cells are tens of meters.

// WGS84
const A: f64 = 6_378_137.0;
const E2: f64 = 0.006_694_379_990_14;

/// Forward map from geographic (lon, lat) degrees into the target CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Raster indexed directly in geographic degrees (EPSG:4326).
    Geographic,
    TransverseMercator(TransverseMercator),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    /// Central meridian, degrees east.
    pub lon0: f64,
    pub k0: f64,
    pub false_easting: f64,
    pub false_northing: f64,
}

impl Projection {
    /// Build the transform for a raster CRS given by EPSG code.
    ///
    /// Supported: 4326 (passthrough) and the WGS84 UTM zones
    /// 32601-32660 (north) / 32701-32760 (south).
    pub fn from_epsg(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Projection::Geographic),
            32601..=32660 => Some(Projection::TransverseMercator(TransverseMercator::utm_zone(
                (code - 32600) as u8,
                false,
            ))),
            32701..=32760 => Some(Projection::TransverseMercator(TransverseMercator::utm_zone(
                (code - 32700) as u8,
                true,
            ))),
            _ => None,
        }
    }

    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        match self {
            Projection::Geographic => (lon, lat),
            Projection::TransverseMercator(tm) => tm.forward(lon, lat),
        }
    }

    /// Project a whole batch of coordinates in one pass.
    pub fn forward_batch(&self, lons: &[f64], lats: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::with_capacity(lons.len());
        let mut ys = Vec::with_capacity(lats.len());
        for (&lon, &lat) in lons.iter().zip(lats) {
            let (x, y) = self.forward(lon, lat);
            xs.push(x);
            ys.push(y);
        }
        (xs, ys)
    }
}

impl TransverseMercator {
    pub fn utm_zone(zone: u8, south: bool) -> Self {
        Self {
            lon0: -183.0 + 6.0 * zone as f64,
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if south { 10_000_000.0 } else { 0.0 },
        }
    }

    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat.to_radians();
        let dlam = (lon - self.lon0).to_radians();

        let ep2 = E2 / (1.0 - E2);
        let sin_phi = phi.sin();
        let cos_phi = phi.cos();

        let n = A / (1.0 - E2 * sin_phi * sin_phi).sqrt();
        let t = (phi.tan()).powi(2);
        let c = ep2 * cos_phi * cos_phi;
        let big_a = dlam * cos_phi;

        let m = meridian_arc(phi);

        let x = self.k0
            * n
            * (big_a
                + (1.0 - t + c) * big_a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * big_a.powi(5) / 120.0)
            + self.false_easting;

        let y = self.k0
            * (m + n
                * phi.tan()
                * (big_a.powi(2) / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * big_a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * big_a.powi(6)
                        / 720.0))
            + self.false_northing;

        (x, y)
    }
}

/// Meridian arc length from the equator to latitude `phi` (radians).
fn meridian_arc(phi: f64) -> f64 {
    let e4 = E2 * E2;
    let e6 = e4 * E2;

    A * ((1.0 - E2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * E2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geographic_is_passthrough() {
        let p = Projection::from_epsg(4326).unwrap();
        assert_eq!(p.forward(15.473, 49.8175), (15.473, 49.8175));
    }

    #[test]
    fn test_unknown_epsg_rejected() {
        assert!(Projection::from_epsg(3857).is_none());
        assert!(Projection::from_epsg(32661).is_none());
    }

    #[test]
    fn test_utm_central_meridian() {
        // Zone 33N has its central meridian at 15E: easting is exactly the
        // false easting, northing is k0 times the meridian arc.
        let p = Projection::from_epsg(32633).unwrap();
        let (x, y) = p.forward(15.0, 50.0);

        assert!((x - 500_000.0).abs() < 0.5, "easting {}", x);
        assert!((y - 5_538_630.0).abs() < 5.0, "northing {}", y);
    }

    #[test]
    fn test_utm_prague() {
        let p = Projection::from_epsg(32633).unwrap();
        let (x, y) = p.forward(14.4214, 50.0875);

        // West of the central meridian, roughly 41 km.
        assert!((x - 458_600.0).abs() < 300.0, "easting {}", x);
        assert!((y - 5_548_500.0).abs() < 300.0, "northing {}", y);
    }

    #[test]
    fn test_forward_is_deterministic() {
        let p = Projection::from_epsg(32633).unwrap();
        let first = p.forward(16.6, 49.19);
        let second = p.forward(16.6, 49.19);
        assert_eq!(first, second);
    }

    #[test]
    fn test_easting_monotonic_in_longitude() {
        let p = Projection::from_epsg(32633).unwrap();
        let (x_west, _) = p.forward(14.0, 49.5);
        let (x_mid, _) = p.forward(15.0, 49.5);
        let (x_east, _) = p.forward(16.0, 49.5);
        assert!(x_west < x_mid && x_mid < x_east);
    }

    #[test]
    fn test_southern_hemisphere_false_northing() {
        let p = Projection::from_epsg(32733).unwrap();
        let (_, y) = p.forward(15.0, -10.0);
        // South of the equator, northings stay positive.
        assert!(y > 8_000_000.0 && y < 10_000_000.0, "northing {}", y);
    }

    #[test]
    fn test_forward_batch_matches_scalar() {
        let p = Projection::from_epsg(32633).unwrap();
        let lons = [14.42, 15.0, 16.61];
        let lats = [50.08, 50.0, 49.19];

        let (xs, ys) = p.forward_batch(&lons, &lats);
        for i in 0..lons.len() {
            let (x, y) = p.forward(lons[i], lats[i]);
            assert_eq!(xs[i], x);
            assert_eq!(ys[i], y);
        }
    }
}
