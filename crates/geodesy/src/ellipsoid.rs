use glam::DVec3;

use crate::{Cartographic, EPSILON12};

const CENTER_TOLERANCE_SQUARED: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    radii: DVec3,
    radii_squared: DVec3,
    one_over_radii: DVec3,
    one_over_radii_squared: DVec3,
    minimum_radius: f64,
    maximum_radius: f64,
}

impl Ellipsoid {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        assert!(
            x > 0.0 && y > 0.0 && z > 0.0,
            "ellipsoid radii must be positive, got ({x}, {y}, {z})"
        );
        let radii = DVec3::new(x, y, z);
        Self {
            radii,
            radii_squared: radii * radii,
            one_over_radii: radii.recip(),
            one_over_radii_squared: (radii * radii).recip(),
            minimum_radius: radii.min_element(),
            maximum_radius: radii.max_element(),
        }
    }

    pub fn wgs84() -> Self {
        Self::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179_5)
    }

    pub fn unit_sphere() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }

    pub fn radii(&self) -> DVec3 {
        self.radii
    }

    pub fn radii_squared(&self) -> DVec3 {
        self.radii_squared
    }

    pub fn one_over_radii(&self) -> DVec3 {
        self.one_over_radii
    }

    pub fn minimum_radius(&self) -> f64 {
        self.minimum_radius
    }

    pub fn maximum_radius(&self) -> f64 {
        self.maximum_radius
    }

    pub fn geodetic_surface_normal_cartographic(&self, cartographic: Cartographic) -> DVec3 {
        let cos_latitude = cartographic.latitude.cos();
        DVec3::new(
            cos_latitude * cartographic.longitude.cos(),
            cos_latitude * cartographic.longitude.sin(),
            cartographic.latitude.sin(),
        )
        .normalize()
    }

    pub fn geodetic_surface_normal(&self, cartesian: DVec3) -> DVec3 {
        (cartesian * self.one_over_radii_squared).normalize()
    }

    pub fn cartographic_to_cartesian(&self, cartographic: Cartographic) -> DVec3 {
        let normal = self.geodetic_surface_normal_cartographic(cartographic);
        let k = self.radii_squared * normal;
        let gamma = normal.dot(k).sqrt();
        k / gamma + normal * cartographic.height
    }

    /// Returns `None` for points too close to the center to have a unique surface projection.
    pub fn cartesian_to_cartographic(&self, cartesian: DVec3) -> Option<Cartographic> {
        let surface = self.scale_to_geodetic_surface(cartesian)?;
        let normal = self.geodetic_surface_normal(surface);
        let height_vector = cartesian - surface;
        let longitude = normal.y.atan2(normal.x);
        let latitude = normal.z.clamp(-1.0, 1.0).asin();
        let height = height_vector.dot(cartesian).signum() * height_vector.length();
        Some(Cartographic::new(longitude, latitude, height))
    }

    pub fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
        let scaled = position * self.one_over_radii;
        let squared = scaled * scaled;
        let squared_norm = squared.x + squared.y + squared.z;
        let ratio = (1.0 / squared_norm).sqrt();
        let intersection = position * ratio;

        if squared_norm < CENTER_TOLERANCE_SQUARED {
            return ratio.is_finite().then_some(intersection);
        }

        let gradient = intersection * self.one_over_radii_squared * 2.0;
        let mut lambda = (1.0 - ratio) * position.length() / (0.5 * gradient.length());
        let mut correction = 0.0;
        let position_squared = position * position;
        let oors = self.one_over_radii_squared;

        loop {
            lambda -= correction;
            let multiplier = DVec3::ONE / (DVec3::ONE + oors * lambda);
            let multiplier_squared = multiplier * multiplier;
            let multiplier_cubed = multiplier_squared * multiplier;

            let func = (position_squared * multiplier_squared).element_sum() - 1.0;
            let denominator = (position_squared * multiplier_cubed * oors).element_sum();
            let derivative = -2.0 * denominator;
            correction = func / derivative;

            if func.abs() <= EPSILON12 {
                return Some(position * multiplier);
            }
        }
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn equator_prime_meridian_maps_to_semimajor_axis() {
        let ellipsoid = Ellipsoid::wgs84();
        let position = ellipsoid.cartographic_to_cartesian(Cartographic::new(0.0, 0.0, 0.0));
        assert!((position - DVec3::new(6_378_137.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn center_has_no_cartographic() {
        assert!(
            Ellipsoid::wgs84()
                .cartesian_to_cartographic(DVec3::ZERO)
                .is_none()
        );
    }

    proptest! {
        #[test]
        fn cartographic_survives_cartesian_conversion(
            longitude in -3.1f64..3.1,
            latitude in -1.5f64..1.5,
            height in -1_000.0f64..100_000.0,
        ) {
            let ellipsoid = Ellipsoid::wgs84();
            let cartesian = ellipsoid
                .cartographic_to_cartesian(Cartographic::new(longitude, latitude, height));
            let back = ellipsoid
                .cartesian_to_cartographic(cartesian)
                .expect("point away from center");
            prop_assert!((back.longitude - longitude).abs() < 1e-9);
            prop_assert!((back.latitude - latitude).abs() < 1e-9);
            prop_assert!((back.height - height).abs() < 1e-4);
        }
    }
}
