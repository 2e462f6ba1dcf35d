//! Sunrise/sunset and the daylight indicator
//!
//! NOAA's general solar position equations (fractional year, equation of
//! time, declination, hour angle at zenith 90.833 degrees). Good to about
//! a minute, which is plenty for tagging hourly telemetry.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// Sunrise/sunset interval for one calendar date at one location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DayInterval {
    Normal {
        sunrise: DateTime<Utc>,
        sunset: DateTime<Utc>,
    },
    /// Sun never sets on this date (high latitude summer).
    PolarDay,
    /// Sun never rises on this date (high latitude winter).
    PolarNight,
}

/// Compute the UTC sunrise/sunset interval for `date` at the given
/// geographic location. Results are rounded to whole seconds.
pub fn sun_interval_utc(date: NaiveDate, lat: f64, lng: f64) -> DayInterval {
    let day_of_year = date.ordinal() as f64;

    // Fractional year at solar noon, radians.
    let gamma = 2.0 * std::f64::consts::PI / 365.0 * (day_of_year - 1.0);

    // Equation of time in minutes.
    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());

    // Solar declination in radians.
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    let lat_rad = lat.to_radians();

    // Hour angle at the official zenith (90.833 deg, refraction-corrected).
    let zenith = 90.833f64.to_radians();
    let cos_ha = zenith.cos() / (lat_rad.cos() * decl.cos()) - lat_rad.tan() * decl.tan();

    if cos_ha < -1.0 {
        return DayInterval::PolarDay;
    }
    if cos_ha > 1.0 {
        return DayInterval::PolarNight;
    }

    let ha_deg = cos_ha.acos().to_degrees();

    // UTC minutes after midnight on `date`; longitude positive east.
    let sunrise_min = 720.0 - 4.0 * (lng + ha_deg) - eqtime;
    let sunset_min = 720.0 - 4.0 * (lng - ha_deg) - eqtime;

    let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight").and_utc();
    DayInterval::Normal {
        sunrise: midnight + Duration::seconds((sunrise_min * 60.0).round() as i64),
        sunset: midnight + Duration::seconds((sunset_min * 60.0).round() as i64),
    }
}

/// Binary daylight indicator for a UTC timestamp.
///
/// The sunrise/sunset interval is the one for the local calendar date of
/// `ts` (local civil time approximated by a fixed UTC offset in minutes).
/// The interval is inclusive at both ends: a timestamp exactly at sunrise
/// or sunset counts as daylight.
pub fn is_daylight(ts: DateTime<Utc>, lat: f64, lng: f64, utc_offset_min: i32) -> u8 {
    let local_date = (ts + Duration::minutes(utc_offset_min as i64)).date_naive();

    match sun_interval_utc(local_date, lat, lng) {
        DayInterval::Normal { sunrise, sunset } => {
            if sunrise <= ts && ts <= sunset {
                1
            } else {
                0
            }
        }
        DayInterval::PolarDay => 1,
        DayInterval::PolarNight => 0,
    }
}
