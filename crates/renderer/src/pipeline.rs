use std::collections::HashMap;
use std::sync::Arc;

use crate::{RenderState, VertexLayout};

pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

pub const BUILTIN_WGSL: &str = include_str!("builtin.wgsl");

/// Prepends the automatic and frustum uniform declarations.
pub fn compose_shader(source: &str) -> String {
    format!("{BUILTIN_WGSL}\n{source}")
}

/// Bind group layouts shared by every context pipeline: automatic uniforms in group 0, frustum
/// uniforms in group 1.
#[derive(Debug, Clone)]
pub struct ContextLayouts {
    pub(crate) automatic: wgpu::BindGroupLayout,
    pub(crate) frustum: wgpu::BindGroupLayout,
}

#[derive(Debug, Clone)]
pub struct PipelineDescriptor<'a> {
    pub label: &'a str,
    /// WGSL with `vs_main` and `fs_main`; built-in declarations are prepended.
    pub shader_source: &'a str,
    pub vertex_layout: &'a VertexLayout,
    pub topology: wgpu::PrimitiveTopology,
    pub render_state: RenderState,
    pub color_format: wgpu::TextureFormat,
    pub depth_stencil: bool,
    /// Group 2, binding 0.
    pub manual_uniforms: bool,
    /// Group 2: one shared sampler at binding 1, textures from binding 2.
    pub texture_count: usize,
}

#[derive(Debug)]
pub struct RenderPipeline {
    label: String,
    pipeline: wgpu::RenderPipeline,
    manual_layout: Option<wgpu::BindGroupLayout>,
    manual_uniforms: bool,
    texture_count: usize,
    render_state: RenderState,
    color_format: wgpu::TextureFormat,
    depth_stencil: bool,
}

impl RenderPipeline {
    pub fn new(
        device: &wgpu::Device,
        layouts: &ContextLayouts,
        descriptor: &PipelineDescriptor<'_>,
    ) -> Self {
        let label = descriptor.label;
        let manual_layout = (descriptor.manual_uniforms || descriptor.texture_count > 0)
            .then(|| manual_bind_group_layout(device, label, descriptor));

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(compose_shader(descriptor.shader_source).into()),
        });
        let mut bind_group_layouts = vec![&layouts.automatic, &layouts.frustum];
        if let Some(manual_layout) = manual_layout.as_ref() {
            bind_group_layouts.push(manual_layout);
        }
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label}.layout")),
            bind_group_layouts: &bind_group_layouts,
            immediate_size: 0,
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[descriptor.vertex_layout.buffer_layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(
                    descriptor
                        .render_state
                        .color_target(descriptor.color_format),
                )],
            }),
            primitive: descriptor.render_state.primitive_state(descriptor.topology),
            depth_stencil: descriptor
                .depth_stencil
                .then(|| descriptor.render_state.depth_stencil_state(DEPTH_STENCIL_FORMAT)),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        tracing::debug!(pipeline = label, "render pipeline created");
        Self {
            label: label.to_owned(),
            pipeline,
            manual_layout,
            manual_uniforms: descriptor.manual_uniforms,
            texture_count: descriptor.texture_count,
            render_state: descriptor.render_state,
            color_format: descriptor.color_format,
            depth_stencil: descriptor.depth_stencil,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn raw(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    pub fn manual_layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.manual_layout.as_ref()
    }

    pub fn manual_uniforms(&self) -> bool {
        self.manual_uniforms
    }

    pub fn texture_count(&self) -> usize {
        self.texture_count
    }

    pub fn color_format(&self) -> wgpu::TextureFormat {
        self.color_format
    }

    pub fn depth_stencil(&self) -> bool {
        self.depth_stencil
    }

    /// The state baked into the pipeline at creation.
    pub fn render_state(&self) -> &RenderState {
        &self.render_state
    }
}

fn manual_bind_group_layout(
    device: &wgpu::Device,
    label: &str,
    descriptor: &PipelineDescriptor<'_>,
) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(2 + descriptor.texture_count);
    if descriptor.manual_uniforms {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    if descriptor.texture_count > 0 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    for index in 0..descriptor.texture_count {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: 2 + index as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{label}.manual_layout")),
        entries: &entries,
    })
}

/// Pipelines shared across commands, keyed by caller-chosen strings.
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: HashMap<String, Arc<RenderPipeline>>,
}

impl PipelineCache {
    pub fn get(&self, key: &str) -> Option<Arc<RenderPipeline>> {
        self.pipelines.get(key).cloned()
    }

    pub fn get_or_create(
        &mut self,
        key: &str,
        create: impl FnOnce() -> RenderPipeline,
    ) -> Arc<RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Arc::clone(pipeline);
        }
        let pipeline = Arc::new(create());
        self.pipelines.insert(key.to_owned(), Arc::clone(&pipeline));
        pipeline
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<RenderPipeline>> {
        self.pipelines.remove(key)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
