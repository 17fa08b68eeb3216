use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use glam::DVec3;

use crate::{Cartographic, Ellipsoid};

/// Latitude at which Web Mercator becomes square, `atan(sinh(pi))`.
pub const WEB_MERCATOR_MAXIMUM_LATITUDE: f64 = 1.484_422_229_745_332_4;

/// Maps geodetic coordinates to a flat 2D world (x east, y north, z height) and back.
pub trait MapProjection: Send + Sync {
    fn ellipsoid(&self) -> &Ellipsoid;
    fn project(&self, cartographic: Cartographic) -> DVec3;
    fn unproject(&self, projected: DVec3) -> Cartographic;
}

/// Equirectangular projection scaled by the semimajor axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeographicProjection {
    ellipsoid: Ellipsoid,
    semimajor_axis: f64,
    one_over_semimajor_axis: f64,
}

impl GeographicProjection {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        let semimajor_axis = ellipsoid.maximum_radius();
        Self {
            ellipsoid,
            semimajor_axis,
            one_over_semimajor_axis: 1.0 / semimajor_axis,
        }
    }
}

impl Default for GeographicProjection {
    fn default() -> Self {
        Self::new(Ellipsoid::wgs84())
    }
}

impl MapProjection for GeographicProjection {
    fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    fn project(&self, cartographic: Cartographic) -> DVec3 {
        DVec3::new(
            cartographic.longitude * self.semimajor_axis,
            cartographic.latitude * self.semimajor_axis,
            cartographic.height,
        )
    }

    fn unproject(&self, projected: DVec3) -> Cartographic {
        Cartographic::new(
            projected.x * self.one_over_semimajor_axis,
            projected.y * self.one_over_semimajor_axis,
            projected.z,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercatorProjection {
    ellipsoid: Ellipsoid,
    semimajor_axis: f64,
    one_over_semimajor_axis: f64,
}

impl WebMercatorProjection {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        let semimajor_axis = ellipsoid.maximum_radius();
        Self {
            ellipsoid,
            semimajor_axis,
            one_over_semimajor_axis: 1.0 / semimajor_axis,
        }
    }

    pub fn mercator_angle_to_geodetic_latitude(mercator_angle: f64) -> f64 {
        FRAC_PI_2 - 2.0 * (-mercator_angle).exp().atan()
    }

    pub fn geodetic_latitude_to_mercator_angle(latitude: f64) -> f64 {
        let latitude =
            latitude.clamp(-WEB_MERCATOR_MAXIMUM_LATITUDE, WEB_MERCATOR_MAXIMUM_LATITUDE);
        (FRAC_PI_4 + latitude * 0.5).tan().ln()
    }
}

impl Default for WebMercatorProjection {
    fn default() -> Self {
        Self::new(Ellipsoid::wgs84())
    }
}

impl MapProjection for WebMercatorProjection {
    fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    fn project(&self, cartographic: Cartographic) -> DVec3 {
        DVec3::new(
            cartographic.longitude * self.semimajor_axis,
            Self::geodetic_latitude_to_mercator_angle(cartographic.latitude) * self.semimajor_axis,
            cartographic.height,
        )
    }

    fn unproject(&self, projected: DVec3) -> Cartographic {
        Cartographic::new(
            projected.x * self.one_over_semimajor_axis,
            Self::mercator_angle_to_geodetic_latitude(projected.y * self.one_over_semimajor_axis),
            projected.z,
        )
    }
}

/// The projection a scene is flattened with in 2D and Columbus view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Geographic(GeographicProjection),
    WebMercator(WebMercatorProjection),
}

impl Default for Projection {
    fn default() -> Self {
        Self::Geographic(GeographicProjection::default())
    }
}

impl MapProjection for Projection {
    fn ellipsoid(&self) -> &Ellipsoid {
        match self {
            Self::Geographic(projection) => projection.ellipsoid(),
            Self::WebMercator(projection) => projection.ellipsoid(),
        }
    }

    fn project(&self, cartographic: Cartographic) -> DVec3 {
        match self {
            Self::Geographic(projection) => projection.project(cartographic),
            Self::WebMercator(projection) => projection.project(cartographic),
        }
    }

    fn unproject(&self, projected: DVec3) -> Cartographic {
        match self {
            Self::Geographic(projection) => projection.unproject(projected),
            Self::WebMercator(projection) => projection.unproject(projected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geographic_projection_scales_by_semimajor_axis() {
        let projection = GeographicProjection::default();
        let projected = projection.project(Cartographic::new(0.5, -0.25, 12.0));
        assert!((projected.x - 0.5 * 6_378_137.0).abs() < 1e-6);
        assert!((projected.y + 0.25 * 6_378_137.0).abs() < 1e-6);
        assert_eq!(projected.z, 12.0);
        let back = projection.unproject(projected);
        assert!((back.longitude - 0.5).abs() < 1e-12);
        assert!((back.latitude + 0.25).abs() < 1e-12);
    }

    #[test]
    fn web_mercator_limit_projects_to_square_extent() {
        let projection = WebMercatorProjection::default();
        let corner = projection.project(Cartographic::new(
            std::f64::consts::PI,
            WEB_MERCATOR_MAXIMUM_LATITUDE,
            0.0,
        ));
        assert!((corner.x - corner.y).abs() < 1e-3);
    }

    #[test]
    fn web_mercator_clamps_polar_latitude() {
        let projection = WebMercatorProjection::default();
        let projected = projection.project(Cartographic::new(0.0, FRAC_PI_2, 0.0));
        assert!(projected.y.is_finite());
        let back = projection.unproject(projected);
        assert!((back.latitude - WEB_MERCATOR_MAXIMUM_LATITUDE).abs() < 1e-9);
    }
}
