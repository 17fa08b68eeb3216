//! The render context: device, target, frame pacing and the resources every draw shares.
//!
//! Frame recording lives in `context_frame`.

use std::collections::HashMap;
use std::sync::{Arc, mpsc};

use bytemuck::Zeroable;
use frame_sync::{FramePacer, FramePacerConfig};
use uniforms::{AutomaticUniforms, FrustumUniforms, UniformState, Viewport};

use crate::context_frame::ActiveFrame;
use crate::pipeline::ContextLayouts;
use crate::uniform_buffer::{UniformArena, uniform_bind_group_layout};
use crate::{
    BoundUniformProvider, ContextError, DEPTH_STENCIL_FORMAT, DrawCommand, Framebuffer,
    FrustumUniformPool, PipelineCache, PipelineDescriptor, PooledFrustumProvider, RenderPipeline,
    RenderState, UniformMap, VIEWPORT_QUAD_INDICES, VIEWPORT_QUAD_VERTICES, VertexArray,
    viewport_quad_layout,
};

pub const VIEWPORT_QUAD_WGSL: &str = include_str!("viewport_quad.wgsl");

const VIEWPORT_QUAD_VERTEX_ARRAY_KEY: &str = "viewport_quad.vertex_array";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContextConfig {
    pub max_frames_in_flight: usize,
    pub offscreen_format: wgpu::TextureFormat,
}

impl Default for FrameContextConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: frame_sync::MAX_FRAMES_IN_FLIGHT,
            offscreen_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

#[derive(Debug)]
pub(crate) enum RenderTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Offscreen {
        texture: wgpu::Texture,
        format: wgpu::TextureFormat,
        size: (u32, u32),
    },
}

impl RenderTarget {
    pub(crate) fn size(&self) -> (u32, u32) {
        match self {
            Self::Surface { config, .. } => (config.width, config.height),
            Self::Offscreen { size, .. } => *size,
        }
    }

    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        match self {
            Self::Surface { config, .. } => config.format,
            Self::Offscreen { format, .. } => *format,
        }
    }
}

/// Options for [`FrameContext::create_viewport_quad_command`].
#[derive(Clone)]
pub struct ViewportQuadOptions {
    pub uniform_map: Option<Arc<dyn UniformMap>>,
    pub manual_uniforms: bool,
    pub texture_count: usize,
    pub render_state: RenderState,
    pub depth_stencil: bool,
}

impl Default for ViewportQuadOptions {
    fn default() -> Self {
        Self {
            uniform_map: None,
            manual_uniforms: false,
            texture_count: 0,
            render_state: RenderState::default(),
            depth_stencil: true,
        }
    }
}

/// Owns the device, the render target and the triple-buffered uniform providers.
///
/// One frame at a time is recorded between `begin_frame` and `end_frame`; at most
/// `max_frames_in_flight` frames are submitted and unfinished on the GPU.
pub struct FrameContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) target: RenderTarget,
    pub(crate) depth_view: wgpu::TextureView,
    pub(crate) pacer: FramePacer,
    pub(crate) uniform_state: UniformState,
    pub(crate) layouts: ContextLayouts,
    pub(crate) automatic_uniforms: BoundUniformProvider,
    pub(crate) frustum_pool: FrustumUniformPool,
    pub(crate) whole_frustum: PooledFrustumProvider,
    pub(crate) default_framebuffer: Framebuffer,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) pipeline_cache: PipelineCache,
    pub(crate) vertex_array_cache: HashMap<String, Arc<VertexArray>>,
    pub(crate) draw_log: Vec<Vec<DrawCommand>>,
    pub(crate) uniform_arena: UniformArena,
    /// Last submission recorded in each ring slot.
    pub(crate) submissions: Vec<Option<wgpu::SubmissionIndex>>,
    pub(crate) frame: Option<ActiveFrame>,
    pub(crate) uncaptured_errors: mpsc::Receiver<String>,
    pub(crate) device_lost: mpsc::Receiver<(wgpu::DeviceLostReason, String)>,
    pub(crate) device_error_count: u64,
    pub(crate) lost: bool,
}

impl FrameContext {
    /// Configures `surface` with `surface_config` and renders into it.
    pub fn with_surface(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: wgpu::Surface<'static>,
        surface_config: wgpu::SurfaceConfiguration,
        config: FrameContextConfig,
    ) -> Result<Self, ContextError> {
        check_size(surface_config.width, surface_config.height)?;
        surface.configure(&device, &surface_config);
        let target = RenderTarget::Surface {
            surface,
            config: surface_config,
        };
        Ok(Self::new(device, queue, target, config))
    }

    /// Renders into a texture that can be copied out after each frame.
    pub fn offscreen(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
        config: FrameContextConfig,
    ) -> Result<Self, ContextError> {
        check_size(width, height)?;
        let texture = create_offscreen_texture(&device, config.offscreen_format, (width, height));
        let target = RenderTarget::Offscreen {
            texture,
            format: config.offscreen_format,
            size: (width, height),
        };
        Ok(Self::new(device, queue, target, config))
    }

    fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        target: RenderTarget,
        config: FrameContextConfig,
    ) -> Self {
        let (device_lost_sender, device_lost) = mpsc::channel();
        device.set_device_lost_callback(move |reason, message| {
            let _ = device_lost_sender.send((reason, message));
        });
        let (uncaptured_error_sender, uncaptured_errors) = mpsc::channel();
        device.on_uncaptured_error(Arc::new(move |error| {
            let _ = uncaptured_error_sender.send(error.to_string());
        }));

        let slots = config.max_frames_in_flight;
        let layouts = ContextLayouts {
            automatic: uniform_bind_group_layout(&device, "context.automatic_layout"),
            frustum: uniform_bind_group_layout(&device, "context.frustum_layout"),
        };
        let automatic_uniforms = BoundUniformProvider::new(
            &device,
            &layouts.automatic,
            "context.automatic_uniforms",
            std::mem::size_of::<AutomaticUniforms>() as u64,
            slots,
        );
        let mut frustum_pool = FrustumUniformPool::new(
            device.clone(),
            layouts.frustum.clone(),
            std::mem::size_of::<FrustumUniforms>() as u64,
            slots,
        );
        let whole_frustum = frustum_pool.acquire();
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("context.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        let uniform_arena = UniformArena::new(&device, slots);
        let size = target.size();
        let depth_view = create_depth_view(&device, size);
        let mut uniform_state = UniformState::new();
        uniform_state.set_viewport(Viewport::new(f64::from(size.0), f64::from(size.1)));

        tracing::info!(
            width = size.0,
            height = size.1,
            format = ?target.format(),
            max_frames_in_flight = slots,
            "frame context created"
        );
        Self {
            device,
            queue,
            target,
            depth_view,
            pacer: FramePacer::new(FramePacerConfig {
                max_frames_in_flight: slots,
            }),
            uniform_state,
            layouts,
            automatic_uniforms,
            frustum_pool,
            whole_frustum,
            default_framebuffer: Framebuffer::default(),
            sampler,
            pipeline_cache: PipelineCache::default(),
            vertex_array_cache: HashMap::new(),
            draw_log: (0..slots).map(|_| Vec::new()).collect(),
            uniform_arena,
            submissions: (0..slots).map(|_| None).collect(),
            frame: None,
            uncaptured_errors,
            device_lost,
            device_error_count: 0,
            lost: false,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn size(&self) -> (u32, u32) {
        self.target.size()
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.target.format()
    }

    pub fn pacer(&self) -> &FramePacer {
        &self.pacer
    }

    pub fn uniform_state(&self) -> &UniformState {
        &self.uniform_state
    }

    pub fn uniform_state_mut(&mut self) -> &mut UniformState {
        &mut self.uniform_state
    }

    pub fn layouts(&self) -> &ContextLayouts {
        &self.layouts
    }

    pub fn pipeline_cache(&mut self) -> &mut PipelineCache {
        &mut self.pipeline_cache
    }

    /// Provider holding the frustum uniforms written at `begin_frame`.
    pub fn whole_frustum_uniforms(&self) -> &BoundUniformProvider {
        &self.whole_frustum
    }

    /// Additional frustum providers for multi-frustum rendering; each returns to the pool on drop.
    pub fn acquire_frustum_provider(&mut self) -> PooledFrustumProvider {
        self.frustum_pool.acquire()
    }

    pub fn frustum_pool(&self) -> &FrustumUniformPool {
        &self.frustum_pool
    }

    /// Commands drawn in the most recent frame that used ring slot `slot`.
    pub fn last_frame_draw_commands(&self, slot: usize) -> &[DrawCommand] {
        &self.draw_log[slot]
    }

    pub fn offscreen_texture(&self) -> Option<&wgpu::Texture> {
        match &self.target {
            RenderTarget::Offscreen { texture, .. } => Some(texture),
            RenderTarget::Surface { .. } => None,
        }
    }

    pub fn device_error_count(&self) -> u64 {
        self.device_error_count
    }

    pub fn is_device_lost(&self) -> bool {
        self.lost
    }

    /// Recreates size-dependent attachments. Zero sizes (a minimized window) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        assert!(self.frame.is_none(), "resize called while a frame is being recorded");
        if width == 0 || height == 0 {
            tracing::debug!(width, height, "ignoring resize to an empty target");
            return;
        }
        if self.target.size() == (width, height) {
            return;
        }
        match &mut self.target {
            RenderTarget::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            RenderTarget::Offscreen {
                texture,
                format,
                size,
            } => {
                *texture = create_offscreen_texture(&self.device, *format, (width, height));
                *size = (width, height);
            }
        }
        self.depth_view = create_depth_view(&self.device, (width, height));
        self.uniform_state
            .set_viewport(Viewport::new(f64::from(width), f64::from(height)));
        tracing::debug!(width, height, "frame context resized");
    }

    /// Shared full-screen quad, created on first use.
    pub fn viewport_quad_vertex_array(&mut self) -> Arc<VertexArray> {
        let device = &self.device;
        Arc::clone(
            self.vertex_array_cache
                .entry(VIEWPORT_QUAD_VERTEX_ARRAY_KEY.to_owned())
                .or_insert_with(|| {
                    Arc::new(VertexArray::new(
                        device,
                        "context.viewport_quad",
                        &VIEWPORT_QUAD_VERTICES,
                        viewport_quad_layout(),
                        Some(&VIEWPORT_QUAD_INDICES),
                    ))
                }),
        )
    }

    /// A draw covering the whole viewport with `fragment_source`, which must define
    /// `fn fs_main(input: ViewportQuadOutput) -> @location(0) vec4<f32>`.
    ///
    /// Pipelines are cached under `label`.
    pub fn create_viewport_quad_command(
        &mut self,
        label: &'static str,
        fragment_source: &str,
        options: ViewportQuadOptions,
    ) -> DrawCommand {
        let vertex_array = self.viewport_quad_vertex_array();
        let key = format!("viewport_quad.{label}");
        let device = &self.device;
        let layouts = &self.layouts;
        let color_format = self.target.format();
        let pipeline = self.pipeline_cache.get_or_create(&key, || {
            let shader_source = format!("{VIEWPORT_QUAD_WGSL}\n{fragment_source}");
            RenderPipeline::new(
                device,
                layouts,
                &PipelineDescriptor {
                    label,
                    shader_source: &shader_source,
                    vertex_layout: vertex_array.layout(),
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    render_state: options.render_state,
                    color_format,
                    depth_stencil: options.depth_stencil,
                    manual_uniforms: options.manual_uniforms,
                    texture_count: options.texture_count,
                },
            )
        });
        let mut command = DrawCommand::new(label, vertex_array).with_pipeline(pipeline);
        command.uniform_map = options.uniform_map;
        command
    }

    pub(crate) fn drain_device_errors(&mut self) {
        while let Ok(message) = self.uncaptured_errors.try_recv() {
            self.device_error_count += 1;
            tracing::error!(count = self.device_error_count, %message, "uncaptured device error");
        }
        if let Ok((reason, message)) = self.device_lost.try_recv() {
            self.lost = true;
            tracing::error!(?reason, %message, "device lost");
        }
    }
}

/// Requests a device without a surface, for offscreen rendering and tests.
pub async fn request_headless_device(
    label: &str,
) -> Result<(wgpu::Device, wgpu::Queue), ContextError> {
    let instance = wgpu::Instance::default();
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: false,
            compatible_surface: None,
        })
        .await?;
    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        })
        .await?;
    Ok((device, queue))
}

fn check_size(width: u32, height: u32) -> Result<(), ContextError> {
    if width == 0 || height == 0 {
        return Err(ContextError::EmptyTarget { width, height });
    }
    Ok(())
}

fn create_offscreen_texture(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    (width, height): (u32, u32),
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("context.offscreen"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    })
}

fn create_depth_view(device: &wgpu::Device, (width, height): (u32, u32)) -> wgpu::TextureView {
    device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("context.depth_stencil"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default())
}

/// Zeroed layouts filled from the uniform state.
pub(crate) fn automatic_uniforms(uniform_state: &mut UniformState) -> AutomaticUniforms {
    let mut layout = AutomaticUniforms::zeroed();
    uniform_state.set_automatic_uniforms(&mut layout);
    layout
}

pub(crate) fn frustum_uniforms(uniform_state: &mut UniformState) -> FrustumUniforms {
    let mut layout = FrustumUniforms::zeroed();
    uniform_state.set_frustum_uniforms(&mut layout);
    layout
}
