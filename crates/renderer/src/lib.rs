//! GPU render context for the globe.
//!
//! Internal architecture overview:
//! - `context`: device, render target, uniform providers and caches owned by [`FrameContext`].
//! - `context_frame`: begin/end of a frame, render passes, clears and draws.
//! - `uniform_buffer`: per-ring-slot uniform buffers and the frustum provider pool.
//! - `pipeline`/`render_state`/`vertex_array`/`draw_command`: what a draw is made of.
//! - `reproject`/`mipmap`: standalone texture passes used by the imagery backend.

mod context;
mod context_frame;
mod draw_command;
mod error;
mod index_datatype;
mod mipmap;
mod pipeline;
mod render_state;
mod reproject;
mod texture;
mod uniform_buffer;
mod vertex_array;

pub use context::{
    FrameContext, FrameContextConfig, VIEWPORT_QUAD_WGSL, ViewportQuadOptions,
    request_headless_device,
};
pub use context_frame::FrameRenderPass;
pub use draw_command::{DrawCommand, DrawOutcome, UniformMap};
pub use error::ContextError;
pub use index_datatype::{IndexDatatype, SIXTY_FOUR_KILOBYTES, create_integer_index_array};
pub use mipmap::{MIPMAP_WGSL, MipmapGenerator};
pub use pipeline::{
    BUILTIN_WGSL, ContextLayouts, DEPTH_STENCIL_FORMAT, PipelineCache, PipelineDescriptor,
    RenderPipeline, compose_shader,
};
pub use render_state::{ClearCommand, Framebuffer, PassState, RenderState, ScissorRect, ViewportRect};
pub use reproject::{REPROJECT_WGSL, ReprojectionCommand, Reprojector};
pub use texture::{GpuTexture, IMAGERY_TEXTURE_FORMAT, TextureSlot};
pub use uniform_buffer::{
    BoundUniformProvider, FrustumUniformPool, PooledFrustumProvider, UniformBufferProvider,
};
pub use vertex_array::{
    IndexBuffer, VIEWPORT_QUAD_INDICES, VIEWPORT_QUAD_VERTICES, VertexArray, VertexLayout,
    ViewportQuadVertex, viewport_quad_layout,
};

#[cfg(test)]
mod tests;
