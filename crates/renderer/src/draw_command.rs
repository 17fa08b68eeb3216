use std::fmt;
use std::sync::Arc;

use glam::DMat4;
use uniforms::{Pass, UniformState};

use crate::{RenderPipeline, RenderState, TextureSlot, UniformBufferProvider, VertexArray};

/// Per-command values bound in group 2.
pub trait UniformMap: Send + Sync {
    /// Backing buffer for binding 0; required when the pipeline declares manual uniforms.
    fn uniform_buffer(&self) -> Option<&UniformBufferProvider> {
        None
    }

    /// Called once per draw after the command's model matrix is applied.
    fn write_uniforms(&self, _uniform_state: &mut UniformState, _bytes: &mut Vec<u8>) {}

    fn textures(&self) -> &[TextureSlot] {
        &[]
    }
}

#[derive(Clone)]
pub struct DrawCommand {
    pub label: &'static str,
    pub vertex_array: Arc<VertexArray>,
    pub pipeline: Option<Arc<RenderPipeline>>,
    /// Dynamic state; the pipeline's own state applies when absent.
    pub render_state: Option<RenderState>,
    pub uniform_map: Option<Arc<dyn UniformMap>>,
    pub model_matrix: Option<DMat4>,
    /// First index (or vertex) drawn.
    pub offset: u32,
    /// Defaults to every index (or vertex) after `offset`.
    pub count: Option<u32>,
    pub pass: Pass,
}

impl DrawCommand {
    pub fn new(label: &'static str, vertex_array: Arc<VertexArray>) -> Self {
        Self {
            label,
            vertex_array,
            pipeline: None,
            render_state: None,
            uniform_map: None,
            model_matrix: None,
            offset: 0,
            count: None,
            pass: Pass::Opaque,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<RenderPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_uniform_map(mut self, uniform_map: Arc<dyn UniformMap>) -> Self {
        self.uniform_map = Some(uniform_map);
        self
    }

    pub fn with_render_state(mut self, render_state: RenderState) -> Self {
        self.render_state = Some(render_state);
        self
    }

    pub fn with_pass(mut self, pass: Pass) -> Self {
        self.pass = pass;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.vertex_array.index_buffer().is_some()
    }
}

impl fmt::Debug for DrawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawCommand")
            .field("label", &self.label)
            .field(
                "pipeline",
                &self.pipeline.as_ref().map(|pipeline| pipeline.label()),
            )
            .field("indexed", &self.is_indexed())
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("pass", &self.pass)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    Drawn,
    /// A required texture is not resident yet; the command is retried next frame.
    SkippedTextureNotResident,
}
