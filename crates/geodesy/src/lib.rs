//! Geodetic value types shared by the imagery and uniform crates.
//!
//! Angles are radians and distances meters unless a name says otherwise.

mod cartographic;
mod ellipsoid;
mod projection;
mod time;
mod transforms;

pub use cartographic::{Cartographic, Rectangle};
pub use ellipsoid::Ellipsoid;
pub use projection::{
    GeographicProjection, MapProjection, Projection, WEB_MERCATOR_MAXIMUM_LATITUDE,
    WebMercatorProjection,
};
pub use time::{JulianDate, SECONDS_PER_DAY, J2000_JULIAN_DAY};
pub use transforms::east_north_up_to_fixed_frame;

pub const EPSILON12: f64 = 1.0e-12;
pub const EPSILON14: f64 = 1.0e-14;

pub fn equals_epsilon(left: f64, right: f64, epsilon: f64) -> bool {
    (left - right).abs() <= epsilon
}
