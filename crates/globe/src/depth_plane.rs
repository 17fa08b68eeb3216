//! A quad through the ellipsoid's limb that writes depth but no color, so geometry behind the
//! globe fails the depth test even where no terrain is drawn.

use std::sync::Arc;

use geodesy::Ellipsoid;
use glam::DVec3;
use renderer::{
    DrawCommand, FrameContext, PipelineDescriptor, RenderPipeline, RenderState,
    UniformBufferProvider, UniformMap, VertexArray,
};
use uniforms::{FrameState, SceneMode, UniformState};

use crate::sky_atmosphere::position_layout;

pub const DEPTH_PLANE_WGSL: &str = include_str!("depth_plane.wgsl");

const DEPTH_PLANE_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

/// Corners of the plane holding the horizon circle seen from `camera_position`, in the order
/// upper-left, lower-left, upper-right, lower-right.
///
/// `None` when the camera is on or inside the ellipsoid, where there is no horizon.
pub fn compute_depth_quad(ellipsoid: &Ellipsoid, camera_position: DVec3) -> Option<[DVec3; 4]> {
    let radii = ellipsoid.radii();
    let q = ellipsoid.one_over_radii() * camera_position;
    let q_magnitude = q.length();
    if q_magnitude.is_nan() || q_magnitude <= 1.0 {
        return None;
    }
    let q_unit = q / q_magnitude;
    // Directly above a pole any horizontal axis works.
    let e_unit = DVec3::Z.cross(q).try_normalize().unwrap_or(DVec3::Y);
    let n_unit = q_unit.cross(e_unit).normalize();

    let w_magnitude = (q.length_squared() - 1.0).sqrt();
    let center = q_unit / q_magnitude;
    let scalar = w_magnitude / q_magnitude;
    let east = e_unit * scalar;
    let north = n_unit * scalar;

    Some([
        (center + north - east) * radii,
        (center - north - east) * radii,
        (center + north + east) * radii,
        (center - north + east) * radii,
    ])
}

struct DepthPlaneUniformMap {
    inverse_radii: [f32; 4],
    buffer: UniformBufferProvider,
}

impl UniformMap for DepthPlaneUniformMap {
    fn uniform_buffer(&self) -> Option<&UniformBufferProvider> {
        Some(&self.buffer)
    }

    fn write_uniforms(&self, _uniform_state: &mut UniformState, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(bytemuck::bytes_of(&self.inverse_radii));
    }
}

pub struct DepthPlane {
    ellipsoid: Ellipsoid,
    command: Option<DrawCommand>,
    visible: bool,
}

impl DepthPlane {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        Self {
            ellipsoid,
            command: None,
            visible: false,
        }
    }

    /// Refits the quad to the frame's camera. Only 3D scenes have a depth plane.
    pub fn update(&mut self, context: &mut FrameContext, frame_state: &FrameState) {
        self.visible = false;
        if frame_state.mode != SceneMode::Scene3D {
            return;
        }
        let Some(corners) = compute_depth_quad(&self.ellipsoid, frame_state.camera.axes.position)
        else {
            tracing::trace!("camera below the ellipsoid surface, depth plane hidden");
            return;
        };
        let vertices = corners.map(|corner| corner.as_vec3().to_array());
        let ellipsoid = self.ellipsoid;
        let command = self
            .command
            .get_or_insert_with(|| create_command(context, &ellipsoid, &vertices));
        command.vertex_array.write_vertices(context.queue(), &vertices);
        self.visible = true;
    }

    /// The command for this frame, present after an `update` in 3D.
    pub fn command(&self) -> Option<&DrawCommand> {
        self.command.as_ref().filter(|_| self.visible)
    }
}

fn create_command(
    context: &mut FrameContext,
    ellipsoid: &Ellipsoid,
    vertices: &[[f32; 3]; 4],
) -> DrawCommand {
    let device = context.device().clone();
    let layouts = context.layouts().clone();
    let color_format = context.color_format();
    let slots = context.pacer().sync_state().slots();

    let vertex_array = Arc::new(VertexArray::new(
        &device,
        "depth_plane",
        vertices,
        position_layout(),
        Some(&DEPTH_PLANE_INDICES),
    ));
    let render_state = RenderState {
        cull: Some(wgpu::Face::Back),
        depth_test: Some(wgpu::CompareFunction::Always),
        depth_write: true,
        color_mask: wgpu::ColorWrites::empty(),
        ..RenderState::default()
    };
    let pipeline = context.pipeline_cache().get_or_create("depth_plane", || {
        RenderPipeline::new(
            &device,
            &layouts,
            &PipelineDescriptor {
                label: "depth_plane",
                shader_source: DEPTH_PLANE_WGSL,
                vertex_layout: vertex_array.layout(),
                topology: wgpu::PrimitiveTopology::TriangleList,
                render_state,
                color_format,
                depth_stencil: true,
                manual_uniforms: true,
                texture_count: 0,
            },
        )
    });
    let inverse_radii = ellipsoid.one_over_radii().as_vec3();
    let uniform_map = DepthPlaneUniformMap {
        inverse_radii: inverse_radii.extend(0.0).to_array(),
        buffer: UniformBufferProvider::new(
            &device,
            "depth_plane.uniforms",
            std::mem::size_of::<[f32; 4]>() as u64,
            slots,
        ),
    };
    DrawCommand::new("depth_plane", vertex_array)
        .with_pipeline(pipeline)
        .with_uniform_map(Arc::new(uniform_map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: DVec3, expected: DVec3) {
        assert!(
            (actual - expected).length() < 1e-9,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn unit_sphere_quad_spans_the_horizon_circle() {
        let sphere = Ellipsoid::new(1.0, 1.0, 1.0);
        let corners = compute_depth_quad(&sphere, DVec3::new(2.0, 0.0, 0.0)).unwrap();
        // Horizon circle at x = 1/2 with radius sqrt(3)/2.
        let half = 3.0_f64.sqrt() / 2.0;
        let east = DVec3::new(0.0, half, 0.0);
        let north = DVec3::new(0.0, 0.0, half);
        let center = DVec3::new(0.5, 0.0, 0.0);
        assert_close(corners[0], center + north - east);
        assert_close(corners[1], center - north - east);
        assert_close(corners[2], center + north + east);
        assert_close(corners[3], center - north + east);
    }

    #[test]
    fn quad_faces_the_camera_counter_clockwise() {
        let ellipsoid = Ellipsoid::wgs84();
        let camera = DVec3::new(1.0e7, 2.0e7, 5.0e6);
        let corners = compute_depth_quad(&ellipsoid, camera).unwrap();
        for triangle in DEPTH_PLANE_INDICES.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| corners[triangle[i] as usize]);
            let normal = (b - a).cross(c - a);
            assert!(normal.dot(camera - a) > 0.0, "triangle {triangle:?} faces away");
        }
    }

    #[test]
    fn no_quad_from_inside_the_ellipsoid() {
        let ellipsoid = Ellipsoid::wgs84();
        assert!(compute_depth_quad(&ellipsoid, DVec3::ZERO).is_none());
        assert!(compute_depth_quad(&ellipsoid, DVec3::new(6.0e6, 0.0, 0.0)).is_none());
    }

    #[test]
    fn camera_over_the_pole_still_gets_a_quad() {
        let ellipsoid = Ellipsoid::wgs84();
        let corners = compute_depth_quad(&ellipsoid, DVec3::new(0.0, 0.0, 1.0e7)).unwrap();
        assert!(corners.iter().all(|corner| corner.is_finite()));
        let z = corners[0].z;
        assert!(corners.iter().all(|corner| (corner.z - z).abs() < 1e-6));
    }
}
