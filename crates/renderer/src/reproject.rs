use std::sync::Arc;

use geodesy::{Rectangle, WebMercatorProjection};
use static_assertions::const_assert_eq;
use wgpu::util::DeviceExt;

use crate::GpuTexture;
use crate::mipmap::{fullscreen_pipeline, linear_clamp_sampler, texture_entry};

pub const REPROJECT_WGSL: &str = include_str!("reproject.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct ReprojectParams {
    rectangle: [f32; 4],
    mercator_bounds: [f32; 2],
    _padding: [f32; 2],
}

const_assert_eq!(std::mem::size_of::<ReprojectParams>(), 32);

impl ReprojectParams {
    fn new(rectangle: &Rectangle) -> Self {
        Self {
            rectangle: [
                rectangle.west as f32,
                rectangle.south as f32,
                rectangle.east as f32,
                rectangle.north as f32,
            ],
            mercator_bounds: [
                WebMercatorProjection::geodetic_latitude_to_mercator_angle(rectangle.south) as f32,
                WebMercatorProjection::geodetic_latitude_to_mercator_angle(rectangle.north) as f32,
            ],
            _padding: [0.0; 2],
        }
    }
}

/// A Web Mercator texture to resample onto the geographic grid of `rectangle`.
#[derive(Debug, Clone)]
pub struct ReprojectionCommand {
    pub source: Arc<GpuTexture>,
    pub rectangle: Rectangle,
    pub width: u32,
    pub height: u32,
    pub mipmapped: bool,
}

impl ReprojectionCommand {
    /// Output matches the source size.
    pub fn new(source: Arc<GpuTexture>, rectangle: Rectangle, mipmapped: bool) -> Self {
        let (width, height) = (source.width(), source.height());
        Self {
            source,
            rectangle,
            width,
            height,
            mipmapped,
        }
    }
}

#[derive(Debug)]
pub struct Reprojector {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl Reprojector {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reproject.layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                texture_entry(2),
            ],
        });
        let pipeline = fullscreen_pipeline(device, "reproject", REPROJECT_WGSL, &layout);
        let sampler = linear_clamp_sampler(device, "reproject.sampler");
        Self {
            pipeline,
            layout,
            sampler,
        }
    }

    /// Records the resample into `encoder` and returns the destination texture. Mip levels beyond
    /// the first are left for the mipmap generator.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        command: &ReprojectionCommand,
    ) -> GpuTexture {
        let destination = GpuTexture::new(
            device,
            "reproject.destination",
            command.width,
            command.height,
            command.mipmapped,
        );
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("reproject.params"),
            contents: bytemuck::bytes_of(&ReprojectParams::new(&command.rectangle)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reproject.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(command.source.view()),
                },
            ],
        });
        let target = destination.mip_view(0);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("reproject.pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
        drop(pass);
        destination
    }
}
