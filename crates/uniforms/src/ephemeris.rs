//! Sun and moon positions plus the TEME frame rotation.
//!
//! The sun follows the NOAA solar position formulas; the moon uses the truncated lunar series from
//! the Astronomical Almanac. Both are good to a fraction of a degree, which is plenty for lighting.

use std::f64::consts::TAU;

use geodesy::{JulianDate, SECONDS_PER_DAY};
use glam::{DMat3, DVec3};

const ASTRONOMICAL_UNIT: f64 = 1.495_978_707e11;
const EARTH_EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// Positions in an Earth-centered inertial frame, meters.
pub trait Ephemeris {
    fn sun_position_inertial(&self, date: JulianDate) -> DVec3;
    fn moon_position_inertial(&self, date: JulianDate) -> DVec3;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowPrecisionEphemeris;

impl Ephemeris for LowPrecisionEphemeris {
    fn sun_position_inertial(&self, date: JulianDate) -> DVec3 {
        let t = date.julian_centuries_since_j2000();
        let mean_anomaly = geom_mean_anomaly_sun(t);
        let eccentricity = eccent_earth_orbit(t);
        let true_anomaly = (mean_anomaly + sun_eq_of_center(t)).to_radians();
        let distance = ASTRONOMICAL_UNIT * 1.000_001_018 * (1.0 - eccentricity * eccentricity)
            / (1.0 + eccentricity * true_anomaly.cos());

        let longitude = sun_apparent_long(t).to_radians();
        let obliquity = obliq_corr(t).to_radians();
        DVec3::new(
            distance * longitude.cos(),
            distance * obliquity.cos() * longitude.sin(),
            distance * obliquity.sin() * longitude.sin(),
        )
    }

    fn moon_position_inertial(&self, date: JulianDate) -> DVec3 {
        let t = date.julian_centuries_since_j2000();
        let term = |phase: f64, rate: f64| (phase + rate * t).to_radians();

        let longitude = 218.32 + 481_267.881 * t + 6.29 * term(135.0, 477_198.87).sin()
            - 1.27 * term(259.3, -413_335.36).sin()
            + 0.66 * term(235.7, 890_534.22).sin()
            + 0.21 * term(269.9, 954_397.74).sin()
            - 0.19 * term(357.5, 35_999.05).sin()
            - 0.11 * term(186.5, 966_404.03).sin();
        let latitude = 5.13 * term(93.3, 483_202.02).sin() + 0.28 * term(228.2, 960_400.89).sin()
            - 0.28 * term(318.3, 6_003.15).sin()
            - 0.17 * term(217.6, -407_332.21).sin();
        let parallax = 0.9508
            + 0.0518 * term(135.0, 477_198.87).cos()
            + 0.0095 * term(259.3, -413_335.36).cos()
            + 0.0078 * term(235.7, 890_534.22).cos()
            + 0.0028 * term(269.9, 954_397.74).cos();

        let distance = EARTH_EQUATORIAL_RADIUS / parallax.to_radians().sin();
        let longitude = longitude.to_radians();
        let latitude = latitude.to_radians();
        let obliquity = mean_obliq_ecliptic(t).to_radians();

        let (sin_lon, cos_lon) = longitude.sin_cos();
        let (sin_lat, cos_lat) = latitude.sin_cos();
        let (sin_obl, cos_obl) = obliquity.sin_cos();
        DVec3::new(
            distance * cos_lat * cos_lon,
            distance * (cos_obl * cos_lat * sin_lon - sin_obl * sin_lat),
            distance * (sin_obl * cos_lat * sin_lon + cos_obl * sin_lat),
        )
    }
}

/// Rotation from True Equator Mean Equinox axes to pseudo-fixed axes, a pure spin about Z by the
/// Greenwich mean sidereal angle.
pub fn teme_to_pseudo_fixed(date: JulianDate) -> DMat3 {
    let angle = greenwich_mean_sidereal_angle(date);
    let (sin, cos) = angle.sin_cos();
    DMat3::from_cols(
        DVec3::new(cos, -sin, 0.0),
        DVec3::new(sin, cos, 0.0),
        DVec3::Z,
    )
}

/// IAU 1982 GMST, radians in `[0, 2pi)`.
pub(crate) fn greenwich_mean_sidereal_angle(date: JulianDate) -> f64 {
    let t = date.julian_centuries_since_j2000();
    let seconds = 67_310.548_41 + (876_600.0 * 3_600.0 + 8_640_184.812_866) * t + 0.093_104 * t * t
        - 6.2e-6 * t * t * t;
    (seconds.rem_euclid(SECONDS_PER_DAY) / SECONDS_PER_DAY) * TAU
}

fn geom_mean_long_sun(t: f64) -> f64 {
    (280.46646 + t * (36_000.76983 + t * 0.0003032)).rem_euclid(360.0)
}

fn geom_mean_anomaly_sun(t: f64) -> f64 {
    357.52911 + t * (35_999.05029 - 0.0001537 * t)
}

fn eccent_earth_orbit(t: f64) -> f64 {
    0.016708634 - t * (0.000042037 + 0.0000001267 * t)
}

fn sun_eq_of_center(t: f64) -> f64 {
    let m = geom_mean_anomaly_sun(t).to_radians();
    m.sin() * (1.914602 - t * (0.004817 + 0.000014 * t))
        + (2.0 * m).sin() * (0.019993 - 0.000101 * t)
        + (3.0 * m).sin() * 0.000289
}

fn sun_apparent_long(t: f64) -> f64 {
    let true_long = geom_mean_long_sun(t) + sun_eq_of_center(t);
    true_long - 0.00569 - 0.00478 * (125.04 - 1934.136 * t).to_radians().sin()
}

fn mean_obliq_ecliptic(t: f64) -> f64 {
    23.0 + (26.0 + (21.448 - t * (46.8150 + t * (0.00059 - t * 0.001813))) / 60.0) / 60.0
}

fn obliq_corr(t: f64) -> f64 {
    mean_obliq_ecliptic(t) + 0.00256 * (125.04 - 1934.136 * t).to_radians().cos()
}
