use glam::{DMat4, DVec3, DVec4};

use crate::{EPSILON14, Ellipsoid, equals_epsilon};

/// Local east-north-up frame at `origin`, expressed in the ellipsoid's fixed frame.
///
/// At the poles east is the fixed +Y axis and north points back across the pole.
pub fn east_north_up_to_fixed_frame(origin: DVec3, ellipsoid: &Ellipsoid) -> DMat4 {
    let (east, north, up) =
        if equals_epsilon(origin.x, 0.0, EPSILON14) && equals_epsilon(origin.y, 0.0, EPSILON14) {
            let sign = if origin.z < 0.0 { -1.0 } else { 1.0 };
            (DVec3::Y, DVec3::new(-sign, 0.0, 0.0), DVec3::new(0.0, 0.0, sign))
        } else {
            let up = ellipsoid.geodetic_surface_normal(origin);
            let east = DVec3::new(-origin.y, origin.x, 0.0).normalize();
            let north = up.cross(east);
            (east, north, up)
        };
    DMat4::from_cols(
        east.extend(0.0),
        north.extend(0.0),
        up.extend(0.0),
        DVec4::new(origin.x, origin.y, origin.z, 1.0),
    )
}
