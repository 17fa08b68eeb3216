//! The scattering shell drawn around the globe.

use std::sync::Arc;

use geodesy::Ellipsoid;
use renderer::{
    DrawCommand, FrameContext, PipelineDescriptor, RenderPipeline, RenderState,
    UniformBufferProvider, UniformMap, VertexArray, VertexLayout,
};
use static_assertions::const_assert_eq;
use uniforms::{FrameState, SceneMode, UniformState};

use crate::geometry::ellipsoid_mesh;

pub const SKY_ATMOSPHERE_WGSL: &str = include_str!("sky_atmosphere.wgsl");

const ATMOSPHERE_SCALE: f64 = 1.025;
const RAYLEIGH_SCALE_DEPTH: f64 = 0.25;
const MESH_PARTITIONS: u32 = 256;
const FROM_SPACE_KEY: &str = "sky_atmosphere.from_space";
const FROM_ATMOSPHERE_KEY: &str = "sky_atmosphere.from_atmosphere";

/// Shell radii and the scale factors the scattering integral uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtmosphereRadii {
    pub outer: f64,
    pub inner: f64,
    pub scale: f64,
    pub scale_depth: f64,
    pub scale_over_scale_depth: f64,
}

impl AtmosphereRadii {
    pub fn new(ellipsoid: &Ellipsoid) -> Self {
        let outer = (ellipsoid.radii() * ATMOSPHERE_SCALE).max_element();
        let inner = ellipsoid.maximum_radius();
        let scale = 1.0 / (outer - inner);
        Self {
            outer,
            inner,
            scale,
            scale_depth: RAYLEIGH_SCALE_DEPTH,
            scale_over_scale_depth: scale / RAYLEIGH_SCALE_DEPTH,
        }
    }

    /// Above the shell the view ray enters the atmosphere from outside.
    pub fn is_camera_in_space(&self, camera_height: f64) -> bool {
        camera_height > self.outer
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct SkyUniforms {
    camera_height: f32,
    camera_height2: f32,
    outer_radius: f32,
    outer_radius2: f32,
    inner_radius: f32,
    scale: f32,
    scale_depth: f32,
    scale_over_scale_depth: f32,
}

const_assert_eq!(std::mem::size_of::<SkyUniforms>(), 32);

impl SkyUniforms {
    fn new(radii: &AtmosphereRadii, camera_height: f64) -> Self {
        Self {
            camera_height: camera_height as f32,
            camera_height2: (camera_height * camera_height) as f32,
            outer_radius: radii.outer as f32,
            outer_radius2: (radii.outer * radii.outer) as f32,
            inner_radius: radii.inner as f32,
            scale: radii.scale as f32,
            scale_depth: radii.scale_depth as f32,
            scale_over_scale_depth: radii.scale_over_scale_depth as f32,
        }
    }
}

struct SkyUniformMap {
    radii: AtmosphereRadii,
    buffer: UniformBufferProvider,
}

impl UniformMap for SkyUniformMap {
    fn uniform_buffer(&self) -> Option<&UniformBufferProvider> {
        Some(&self.buffer)
    }

    fn write_uniforms(&self, uniform_state: &mut UniformState, bytes: &mut Vec<u8>) {
        let camera_height = uniform_state.camera_position().length();
        bytes.extend_from_slice(bytemuck::bytes_of(&SkyUniforms::new(
            &self.radii,
            camera_height,
        )));
    }
}

struct SkyResources {
    command: DrawCommand,
    from_space: Arc<RenderPipeline>,
    from_atmosphere: Arc<RenderPipeline>,
}

/// Draws the atmosphere shell in 3D, switching shaders as the camera crosses the outer radius.
pub struct SkyAtmosphere {
    pub show: bool,
    radii: AtmosphereRadii,
    ellipsoid: Ellipsoid,
    resources: Option<SkyResources>,
}

impl SkyAtmosphere {
    pub fn new(ellipsoid: Ellipsoid) -> Self {
        Self {
            show: true,
            radii: AtmosphereRadii::new(&ellipsoid),
            ellipsoid,
            resources: None,
        }
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn radii(&self) -> &AtmosphereRadii {
        &self.radii
    }

    /// The command to draw this frame, if the sky is visible in the current mode and pass.
    pub fn update(
        &mut self,
        context: &mut FrameContext,
        frame_state: &FrameState,
    ) -> Option<DrawCommand> {
        if !self.show
            || !matches!(frame_state.mode, SceneMode::Scene3D | SceneMode::Morphing)
            || !frame_state.passes.render
        {
            return None;
        }
        let radii = self.radii;
        let ellipsoid = self.ellipsoid;
        let resources = self
            .resources
            .get_or_insert_with(|| create_resources(context, &ellipsoid, radii));

        let camera_height = frame_state.camera.axes.position.length();
        let pipeline = if radii.is_camera_in_space(camera_height) {
            &resources.from_space
        } else {
            &resources.from_atmosphere
        };
        resources.command.pipeline = Some(Arc::clone(pipeline));
        Some(resources.command.clone())
    }
}

fn create_resources(
    context: &mut FrameContext,
    ellipsoid: &Ellipsoid,
    radii: AtmosphereRadii,
) -> SkyResources {
    let device = context.device().clone();
    let layouts = context.layouts().clone();
    let color_format = context.color_format();
    let slots = context.pacer().sync_state().slots();

    let mesh = ellipsoid_mesh(
        ellipsoid.radii() * ATMOSPHERE_SCALE,
        MESH_PARTITIONS,
        MESH_PARTITIONS,
    );
    let vertex_array = Arc::new(VertexArray::new(
        &device,
        "sky_atmosphere",
        &mesh.positions,
        position_layout(),
        Some(&mesh.indices),
    ));
    let render_state = RenderState {
        cull: Some(wgpu::Face::Front),
        blending: Some(wgpu::BlendState::ALPHA_BLENDING),
        ..RenderState::default()
    };
    let mut create = |key: &'static str, from_space: bool| {
        context.pipeline_cache().get_or_create(key, || {
            let shader_source = format!(
                "const SKY_FROM_SPACE: bool = {from_space};\n{SKY_ATMOSPHERE_WGSL}"
            );
            RenderPipeline::new(
                &device,
                &layouts,
                &PipelineDescriptor {
                    label: key,
                    shader_source: &shader_source,
                    vertex_layout: vertex_array.layout(),
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    render_state,
                    color_format,
                    depth_stencil: true,
                    manual_uniforms: true,
                    texture_count: 0,
                },
            )
        })
    };
    let from_space = create(FROM_SPACE_KEY, true);
    let from_atmosphere = create(FROM_ATMOSPHERE_KEY, false);

    let uniform_map = SkyUniformMap {
        radii,
        buffer: UniformBufferProvider::new(
            &device,
            "sky_atmosphere.uniforms",
            std::mem::size_of::<SkyUniforms>() as u64,
            slots,
        ),
    };
    let command = DrawCommand::new("sky_atmosphere", vertex_array)
        .with_pipeline(Arc::clone(&from_space))
        .with_uniform_map(Arc::new(uniform_map));
    tracing::debug!(
        outer_radius = radii.outer,
        inner_radius = radii.inner,
        "sky atmosphere resources created"
    );
    SkyResources {
        command,
        from_space,
        from_atmosphere,
    }
}

pub(crate) fn position_layout() -> VertexLayout {
    VertexLayout {
        stride: std::mem::size_of::<[f32; 3]>() as u64,
        attributes: wgpu::vertex_attr_array![0 => Float32x3].to_vec(),
    }
}
