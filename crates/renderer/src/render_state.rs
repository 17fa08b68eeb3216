//! Fixed-function state for draws and passes.
//!
//! Culling, depth and blending are baked into pipelines, so `RenderState` feeds pipeline creation;
//! viewport, scissor, stencil reference and blend constant are applied per draw.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub cull: Option<wgpu::Face>,
    pub front_face: wgpu::FrontFace,
    /// `None` disables the depth test.
    pub depth_test: Option<wgpu::CompareFunction>,
    pub depth_write: bool,
    pub blending: Option<wgpu::BlendState>,
    pub color_mask: wgpu::ColorWrites,
    pub viewport: Option<ViewportRect>,
    pub scissor: Option<ScissorRect>,
    pub stencil_reference: u32,
    pub blend_color: Option<wgpu::Color>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            cull: None,
            front_face: wgpu::FrontFace::Ccw,
            depth_test: None,
            depth_write: false,
            blending: None,
            color_mask: wgpu::ColorWrites::ALL,
            viewport: None,
            scissor: None,
            stencil_reference: 0,
            blend_color: None,
        }
    }
}

impl RenderState {
    pub fn primitive_state(&self, topology: wgpu::PrimitiveTopology) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology,
            strip_index_format: None,
            front_face: self.front_face,
            cull_mode: self.cull,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }

    pub fn depth_stencil_state(&self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write,
            depth_compare: self.depth_test.unwrap_or(wgpu::CompareFunction::Always),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }

    pub fn color_target(&self, format: wgpu::TextureFormat) -> wgpu::ColorTargetState {
        wgpu::ColorTargetState {
            format,
            blend: self.blending,
            write_mask: self.color_mask,
        }
    }

    pub(crate) fn apply(
        &self,
        pass: &mut wgpu::RenderPass<'_>,
        pass_viewport: Option<ViewportRect>,
        target_size: (u32, u32),
    ) {
        let viewport = self.viewport.or(pass_viewport).unwrap_or(ViewportRect {
            x: 0.0,
            y: 0.0,
            width: target_size.0 as f32,
            height: target_size.1 as f32,
        });
        pass.set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, 0.0, 1.0);
        let scissor = self.scissor.unwrap_or(ScissorRect {
            x: 0,
            y: 0,
            width: target_size.0,
            height: target_size.1,
        });
        pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
        pass.set_stencil_reference(self.stencil_reference);
        if let Some(color) = self.blend_color {
            pass.set_blend_constant(color);
        }
    }
}

/// Render target attachments. The context's default framebuffer tracks the acquired drawable.
#[derive(Debug, Clone, Default)]
pub struct Framebuffer {
    pub color: Option<wgpu::TextureView>,
    pub depth_stencil: Option<wgpu::TextureView>,
    pub size: (u32, u32),
}

impl Framebuffer {
    pub(crate) fn update_from_drawable(
        &mut self,
        color: wgpu::TextureView,
        depth_stencil: Option<wgpu::TextureView>,
        size: (u32, u32),
    ) {
        self.color = Some(color);
        self.depth_stencil = depth_stencil;
        self.size = size;
    }

    pub(crate) fn clear_drawable(&mut self) {
        self.color = None;
    }
}

/// Where a render pass draws; `None` fields fall back to the context defaults.
#[derive(Debug, Clone, Default)]
pub struct PassState {
    pub framebuffer: Option<Framebuffer>,
    pub viewport: Option<ViewportRect>,
}

/// Attachments left `None` keep their contents.
#[derive(Debug, Clone, Default)]
pub struct ClearCommand {
    pub color: Option<wgpu::Color>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
    pub framebuffer: Option<Framebuffer>,
}

impl ClearCommand {
    pub fn all(color: wgpu::Color) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
            framebuffer: None,
        }
    }

    pub(crate) fn color_ops(&self) -> wgpu::Operations<wgpu::Color> {
        wgpu::Operations {
            load: match self.color {
                Some(color) => wgpu::LoadOp::Clear(color),
                None => wgpu::LoadOp::Load,
            },
            store: wgpu::StoreOp::Store,
        }
    }

    pub(crate) fn depth_ops(&self) -> wgpu::Operations<f32> {
        wgpu::Operations {
            load: match self.depth {
                Some(depth) => wgpu::LoadOp::Clear(depth),
                None => wgpu::LoadOp::Load,
            },
            store: wgpu::StoreOp::Store,
        }
    }

    pub(crate) fn stencil_ops(&self) -> wgpu::Operations<u32> {
        wgpu::Operations {
            load: match self.stencil {
                Some(stencil) => wgpu::LoadOp::Clear(stencil),
                None => wgpu::LoadOp::Load,
            },
            store: wgpu::StoreOp::Store,
        }
    }
}
