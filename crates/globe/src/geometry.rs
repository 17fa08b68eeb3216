use glam::DVec3;

/// Positions and triangle indices of a latitude/longitude ellipsoid mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct EllipsoidMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// Tessellates the ellipsoid with `radii` into `stacks` rings from the north pole to the south pole
/// and `slices` segments around the axis. Triangles wind counter-clockwise seen from outside.
pub fn ellipsoid_mesh(radii: DVec3, slices: u32, stacks: u32) -> EllipsoidMesh {
    assert!(
        slices >= 3 && stacks >= 2,
        "ellipsoid mesh needs at least 3 slices and 2 stacks, got {slices}x{stacks}"
    );
    let columns = slices + 1;
    let mut positions = Vec::with_capacity((columns * (stacks + 1)) as usize);
    for stack in 0..=stacks {
        let phi = std::f64::consts::PI * f64::from(stack) / f64::from(stacks);
        let (sin_phi, cos_phi) = phi.sin_cos();
        for slice in 0..=slices {
            let theta = std::f64::consts::TAU * f64::from(slice) / f64::from(slices);
            let (sin_theta, cos_theta) = theta.sin_cos();
            let position = radii * DVec3::new(sin_phi * cos_theta, sin_phi * sin_theta, cos_phi);
            positions.push(position.as_vec3().to_array());
        }
    }

    let mut indices = Vec::with_capacity((slices * stacks * 6) as usize);
    for stack in 0..stacks {
        for slice in 0..slices {
            let a = stack * columns + slice;
            let b = a + columns;
            let c = b + 1;
            let d = a + 1;
            indices.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }
    EllipsoidMesh { positions, indices }
}
