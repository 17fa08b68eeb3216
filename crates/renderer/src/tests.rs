//! Render context tests.
//!
//! GPU tests run on the fallback adapter and return early on machines without one.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use frame_sync::BufferSyncState;
use uniforms::UniformState;

use super::*;
use crate::wgsl_tests::{SOLID_FRAGMENT_WGSL, TEXTURED_FRAGMENT_WGSL};

const RED: wgpu::Color = wgpu::Color {
    r: 1.0,
    g: 0.0,
    b: 0.0,
    a: 1.0,
};

fn test_device(label: &str) -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let Ok(adapter) = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: true,
            })
            .await
        else {
            return None;
        };
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .expect("request test device");
        Some((device, queue))
    })
}

fn offscreen_context(label: &str, width: u32, height: u32) -> Option<FrameContext> {
    let (device, queue) = test_device(label)?;
    Some(
        FrameContext::offscreen(device, queue, width, height, FrameContextConfig::default())
            .expect("create offscreen context"),
    )
}

/// Tightly packed RGBA8 pixels of the offscreen target.
fn read_offscreen(context: &FrameContext) -> Vec<u8> {
    let texture = context
        .offscreen_texture()
        .expect("context renders offscreen");
    let (width, height) = context.size();
    let device = context.device();
    let unpadded_bytes_per_row = width * 4;
    let padded_bytes_per_row = unpadded_bytes_per_row.div_ceil(256) * 256;
    let readback = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("context.test.readback"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("context.test.readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    context.queue().submit(Some(encoder.finish()));

    let (sender, receiver) = std::sync::mpsc::channel();
    readback
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).expect("send map result");
        });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll must succeed for readback mapping");
    receiver
        .recv()
        .expect("receive map result")
        .expect("map readback buffer");
    let mapped = readback.slice(..).get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
    for row in mapped.chunks(padded_bytes_per_row as usize) {
        pixels.extend_from_slice(&row[..unpadded_bytes_per_row as usize]);
    }
    drop(mapped);
    readback.unmap();
    pixels
}

fn assert_all_pixels(pixels: &[u8], expected: [u8; 4]) {
    for (index, pixel) in pixels.chunks_exact(4).enumerate() {
        for channel in 0..4 {
            let difference = i16::from(pixel[channel]) - i16::from(expected[channel]);
            assert!(
                difference.abs() <= 1,
                "pixel {index} is {pixel:?}, expected {expected:?}"
            );
        }
    }
}

struct TintMap {
    buffer: UniformBufferProvider,
    textures: [TextureSlot; 1],
    color: [f32; 4],
}

impl UniformMap for TintMap {
    fn uniform_buffer(&self) -> Option<&UniformBufferProvider> {
        Some(&self.buffer)
    }

    fn write_uniforms(&self, _uniform_state: &mut UniformState, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(bytemuck::bytes_of(&self.color));
    }

    fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }
}

/// Hands out the next color of `colors` on every draw.
struct PaletteMap {
    buffer: UniformBufferProvider,
    textures: [TextureSlot; 1],
    colors: Vec<[f32; 4]>,
    next: AtomicUsize,
}

impl UniformMap for PaletteMap {
    fn uniform_buffer(&self) -> Option<&UniformBufferProvider> {
        Some(&self.buffer)
    }

    fn write_uniforms(&self, _uniform_state: &mut UniformState, bytes: &mut Vec<u8>) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.colors.len();
        bytes.extend_from_slice(bytemuck::bytes_of(&self.colors[index]));
    }

    fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }
}

#[test]
fn clear_fills_the_offscreen_target() {
    let Some(mut context) = offscreen_context("context.test.clear", 8, 4) else {
        return;
    };
    context.begin_frame().expect("offscreen frames always begin");
    context.clear(&ClearCommand::all(RED), None);
    context.end_frame();
    assert_all_pixels(&read_offscreen(&context), [255, 0, 0, 255]);
}

#[test]
fn ring_slot_advances_and_wraps() {
    let Some(mut context) = offscreen_context("context.test.ring", 4, 4) else {
        return;
    };
    let mut slots = Vec::new();
    for _ in 0..4 {
        let slot = context.begin_frame().expect("offscreen frames always begin");
        slots.push(slot.index());
        assert!(context.pacer().in_flight() <= 3);
        context.end_frame();
    }
    assert_eq!(slots, vec![0, 1, 2, 0]);
    assert_eq!(context.pacer().frames_begun(), 4);
}

#[test]
fn draws_are_logged_for_their_ring_slot() {
    let Some(mut context) = offscreen_context("context.test.draw_log", 4, 4) else {
        return;
    };
    let command = context.create_viewport_quad_command(
        "test.solid",
        SOLID_FRAGMENT_WGSL,
        ViewportQuadOptions::default(),
    );

    context.begin_frame().expect("offscreen frames always begin");
    let mut pass = context.create_render_pass(None);
    assert_eq!(context.draw(&command, &mut pass, None), DrawOutcome::Drawn);
    assert_eq!(context.draw(&command, &mut pass, None), DrawOutcome::Drawn);
    context.complete_render_pass(pass);
    context.end_frame();

    context.begin_frame().expect("offscreen frames always begin");
    context.end_frame();

    assert_eq!(context.last_frame_draw_commands(0).len(), 2);
    assert_eq!(context.last_frame_draw_commands(0)[0].label, "test.solid");
    assert!(context.last_frame_draw_commands(1).is_empty());
}

#[test]
fn one_uniform_map_drawn_twice_keeps_each_draws_block() {
    let Some(mut context) = offscreen_context("context.test.repeated_uniforms", 8, 4) else {
        return;
    };
    let white = TextureSlot::new();
    white.set(Arc::new(GpuTexture::from_rgba8(
        context.device(),
        context.queue(),
        "test.white",
        1,
        1,
        &[255, 255, 255, 255],
        false,
    )));
    let palette = Arc::new(PaletteMap {
        buffer: UniformBufferProvider::new(context.device(), "test.palette", 16, 3),
        textures: [white],
        colors: vec![[1.0, 0.0, 0.0, 1.0], [0.0, 0.0, 1.0, 1.0]],
        next: AtomicUsize::new(0),
    });
    let command = context.create_viewport_quad_command(
        "test.palette",
        TEXTURED_FRAGMENT_WGSL,
        ViewportQuadOptions {
            uniform_map: Some(palette),
            manual_uniforms: true,
            texture_count: 1,
            ..ViewportQuadOptions::default()
        },
    );
    let base_state = *command.pipeline.as_ref().expect("pipeline").render_state();
    let half = |x: f32| {
        let mut half = command.clone();
        half.render_state = Some(RenderState {
            viewport: Some(ViewportRect {
                x,
                y: 0.0,
                width: 4.0,
                height: 4.0,
            }),
            ..base_state
        });
        half
    };
    let (left, right) = (half(0.0), half(4.0));

    for _ in 0..2 {
        context.begin_frame().expect("offscreen frames always begin");
        let mut pass = context.create_render_pass(None);
        assert_eq!(context.draw(&left, &mut pass, None), DrawOutcome::Drawn);
        assert_eq!(context.draw(&right, &mut pass, None), DrawOutcome::Drawn);
        context.complete_render_pass(pass);
        context.end_frame();

        let pixels = read_offscreen(&context);
        for row in pixels.chunks_exact(8 * 4) {
            assert_all_pixels(&row[..16], [255, 0, 0, 255]);
            assert_all_pixels(&row[16..], [0, 0, 255, 255]);
        }
    }
}

#[test]
fn uniform_arena_grows_past_its_initial_size() {
    let Some((device, queue)) = test_device("context.test.uniform_arena") else {
        return;
    };
    let slot = BufferSyncState::new(3);
    let mut arena = crate::uniform_buffer::UniformArena::new(&device, 3);
    let initial = arena.capacity(slot);
    let block = vec![7u8; 256];
    let (first, first_offset) = arena.allocate(&device, &queue, slot, 256, &block);
    let (_, second_offset) = arena.allocate(&device, &queue, slot, 256, &block);
    assert_eq!(first_offset, 0);
    assert!(second_offset >= 256);
    assert_eq!(second_offset % u64::from(device.limits().min_uniform_buffer_offset_alignment), 0);

    let large = vec![1u8; initial as usize];
    let (grown, offset) = arena.allocate(&device, &queue, slot, initial, &large);
    assert_eq!(offset, 0);
    assert!(arena.capacity(slot) > initial);
    assert_ne!(grown.size(), first.size());

    arena.reset();
    let (_, offset) = arena.allocate(&device, &queue, slot, 256, &block);
    assert_eq!(offset, 0);
}

#[test]
fn each_frame_records_its_submission_in_its_slot() {
    let Some(mut context) = offscreen_context("context.test.submissions", 4, 4) else {
        return;
    };
    assert!(context.submissions.iter().all(Option::is_none));
    for frame in 0..5 {
        let slot = context.begin_frame().expect("offscreen frames always begin");
        context.clear(&ClearCommand::all(RED), None);
        context.end_frame();
        assert!(context.submissions[slot.index()].is_some(), "frame {frame}");
    }
    assert!(context.submissions.iter().all(Option::is_some));
    assert_eq!(context.pacer().frames_begun(), 5);
}

#[test]
fn draw_waits_for_texture_residency() {
    let Some(mut context) = offscreen_context("context.test.residency", 4, 4) else {
        return;
    };
    let slot = TextureSlot::new();
    let tint = Arc::new(TintMap {
        buffer: UniformBufferProvider::new(context.device(), "test.tint", 16, 3),
        textures: [slot.clone()],
        color: [1.0, 1.0, 1.0, 1.0],
    });
    let command = context.create_viewport_quad_command(
        "test.textured",
        TEXTURED_FRAGMENT_WGSL,
        ViewportQuadOptions {
            uniform_map: Some(tint),
            manual_uniforms: true,
            texture_count: 1,
            ..ViewportQuadOptions::default()
        },
    );

    context.begin_frame().expect("offscreen frames always begin");
    context.clear(&ClearCommand::all(RED), None);
    let mut pass = context.create_render_pass(None);
    assert_eq!(
        context.draw(&command, &mut pass, None),
        DrawOutcome::SkippedTextureNotResident
    );
    context.complete_render_pass(pass);
    context.end_frame();
    assert_all_pixels(&read_offscreen(&context), [255, 0, 0, 255]);
    assert_eq!(context.last_frame_draw_commands(0).len(), 1);

    slot.set(Arc::new(GpuTexture::from_rgba8(
        context.device(),
        context.queue(),
        "test.green",
        1,
        1,
        &[0, 255, 0, 255],
        false,
    )));
    context.begin_frame().expect("offscreen frames always begin");
    let mut pass = context.create_render_pass(None);
    assert_eq!(context.draw(&command, &mut pass, None), DrawOutcome::Drawn);
    context.complete_render_pass(pass);
    context.end_frame();
    assert_all_pixels(&read_offscreen(&context), [0, 255, 0, 255]);
}

#[test]
fn draw_without_pipeline_panics_after_logging() {
    let Some(mut context) = offscreen_context("context.test.no_pipeline", 4, 4) else {
        return;
    };
    let vertex_array = context.viewport_quad_vertex_array();
    let command = DrawCommand::new("test.no_pipeline", vertex_array);

    context.begin_frame().expect("offscreen frames always begin");
    let mut pass = context.create_render_pass(None);
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
        context.draw(&command, &mut pass, None);
    }));
    assert!(result.is_err(), "drawing without a pipeline must panic");
    assert_eq!(context.last_frame_draw_commands(0).len(), 1);
}

#[test]
fn viewport_quad_resources_are_cached() {
    let Some(mut context) = offscreen_context("context.test.caches", 4, 4) else {
        return;
    };
    let first = context.create_viewport_quad_command(
        "test.solid",
        SOLID_FRAGMENT_WGSL,
        ViewportQuadOptions::default(),
    );
    let second = context.create_viewport_quad_command(
        "test.solid",
        SOLID_FRAGMENT_WGSL,
        ViewportQuadOptions::default(),
    );
    assert!(Arc::ptr_eq(&first.vertex_array, &second.vertex_array));
    assert!(Arc::ptr_eq(
        first.pipeline.as_ref().expect("quad pipeline"),
        second.pipeline.as_ref().expect("quad pipeline"),
    ));
    assert_eq!(context.pipeline_cache().len(), 1);
    assert_eq!(
        first.vertex_array.index_buffer().map(IndexBuffer::datatype),
        Some(IndexDatatype::UnsignedShort)
    );
}

#[test]
fn frustum_providers_return_to_the_pool() {
    let Some(mut context) = offscreen_context("context.test.frustum_pool", 4, 4) else {
        return;
    };
    // The whole-frustum provider is the first allocation.
    assert_eq!(context.frustum_pool().created(), 1);
    let provider = context.acquire_frustum_provider();
    assert_eq!(context.frustum_pool().created(), 2);
    drop(provider);
    assert_eq!(context.frustum_pool().available(), 1);
    let _reused = context.acquire_frustum_provider();
    assert_eq!(context.frustum_pool().created(), 2);
    assert_eq!(context.frustum_pool().available(), 0);
}

#[test]
fn additional_frustum_is_written_each_frame() {
    let Some(mut context) = offscreen_context("context.test.multi_frustum", 4, 4) else {
        return;
    };
    let near = context.acquire_frustum_provider();
    let command = context.create_viewport_quad_command(
        "test.solid",
        SOLID_FRAGMENT_WGSL,
        ViewportQuadOptions::default(),
    );
    let slot = context.begin_frame().expect("offscreen frames always begin");
    assert!(!near.provider().is_write_complete(slot));
    context.update_frustum_uniforms(Some(&*near));
    assert!(near.provider().is_write_complete(slot));
    let mut pass = context.create_render_pass(None);
    context.draw(&command, &mut pass, Some(&*near));
    context.complete_render_pass(pass);
    context.end_frame();
}

#[test]
fn resize_ignores_empty_sizes() {
    let Some(mut context) = offscreen_context("context.test.resize", 4, 4) else {
        return;
    };
    context.resize(0, 10);
    assert_eq!(context.size(), (4, 4));
    context.resize(16, 8);
    assert_eq!(context.size(), (16, 8));
    assert_eq!(context.uniform_state().viewport().width, 16.0);
    context.begin_frame().expect("offscreen frames always begin");
    context.clear(&ClearCommand::all(RED), None);
    context.end_frame();
    assert_eq!(read_offscreen(&context).len(), 16 * 8 * 4);
}

#[test]
fn empty_offscreen_target_is_rejected() {
    let Some((device, queue)) = test_device("context.test.empty") else {
        return;
    };
    let result = FrameContext::offscreen(device, queue, 0, 4, FrameContextConfig::default());
    assert!(matches!(
        result,
        Err(ContextError::EmptyTarget {
            width: 0,
            height: 4
        })
    ));
}

#[test]
fn mipmaps_and_reprojection_encode_into_one_submission() {
    let Some((device, queue)) = test_device("context.test.texture_passes") else {
        return;
    };
    let pixels: Vec<u8> = [0u8, 0, 255, 255].repeat(16 * 16);
    let source = Arc::new(GpuTexture::from_rgba8(
        &device, &queue, "test.source", 16, 16, &pixels, false,
    ));
    let reprojector = Reprojector::new(&device);
    let mipmaps = MipmapGenerator::new(&device);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("context.test.texture_passes"),
    });
    let command = ReprojectionCommand::new(
        source,
        geodesy::Rectangle::from_degrees(-10.0, -10.0, 10.0, 10.0),
        true,
    );
    let reprojected = reprojector.encode(&device, &mut encoder, &command);
    mipmaps.generate(&device, &mut encoder, &reprojected);
    queue.submit(Some(encoder.finish()));
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .expect("device poll");
    assert_eq!(reprojected.width(), 16);
    assert_eq!(reprojected.mip_level_count(), 5);
}
