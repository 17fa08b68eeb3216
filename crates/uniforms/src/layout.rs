use bytemuck::{Pod, Zeroable};
use glam::{DMat3, DMat4};
use static_assertions::const_assert_eq;

/// Per-frame values shared by every draw, bind group 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct AutomaticUniforms {
    pub view_rotation: [[f32; 4]; 3],
    pub teme_to_pseudo_fixed: [[f32; 4]; 3],
    pub sun_direction_ec: [f32; 3],
    pub morph_time: f32,
    pub sun_direction_wc: [f32; 3],
    pub fog_density: f32,
    pub moon_direction_ec: [f32; 3],
    pub frame_number: f32,
    pub viewer_position_wc: [f32; 3],
    pub pass: f32,
}

/// Per-frustum transforms, bind group 1.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrustumUniforms {
    pub viewport_orthographic: [[f32; 4]; 4],
    pub viewport_transformation: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub model_view_3d: [[f32; 4]; 4],
    pub inverse_model_view: [[f32; 4]; 4],
    pub model_view_projection: [[f32; 4]; 4],
    pub viewport: [f32; 4],
    pub normal: [[f32; 4]; 3],
    pub normal_3d: [[f32; 4]; 3],
    pub entire_frustum: [f32; 2],
    pub _padding: [f32; 2],
}

// WGSL uniform layout: mat3x3 columns pad to 16 bytes, structs round up to 16.
const_assert_eq!(std::mem::size_of::<AutomaticUniforms>(), 160);
const_assert_eq!(std::mem::size_of::<FrustumUniforms>(), 704);
const_assert_eq!(std::mem::size_of::<AutomaticUniforms>() % 16, 0);
const_assert_eq!(std::mem::size_of::<FrustumUniforms>() % 16, 0);

pub fn mat4_to_f32(matrix: DMat4) -> [[f32; 4]; 4] {
    matrix.as_mat4().to_cols_array_2d()
}

pub fn mat3_to_padded(matrix: DMat3) -> [[f32; 4]; 3] {
    let columns = matrix.as_mat3().to_cols_array_2d();
    columns.map(|[x, y, z]| [x, y, z, 0.0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn padded_mat3_keeps_columns() {
        let matrix = DMat3::from_cols(
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(4.0, 5.0, 6.0),
            DVec3::new(7.0, 8.0, 9.0),
        );
        assert_eq!(
            mat3_to_padded(matrix),
            [
                [1.0, 2.0, 3.0, 0.0],
                [4.0, 5.0, 6.0, 0.0],
                [7.0, 8.0, 9.0, 0.0],
            ]
        );
    }

    #[test]
    fn automatic_layout_is_plain_bytes() {
        let uniforms = AutomaticUniforms {
            pass: 2.0,
            ..AutomaticUniforms::zeroed()
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 160);
        assert_eq!(&bytes[156..160], &2.0f32.to_ne_bytes());
    }
}
