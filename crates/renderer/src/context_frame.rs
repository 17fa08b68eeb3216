//! Frame recording: begin, passes, clears, draws and submission.

use std::sync::Arc;

use frame_sync::{BeginFrameError, BufferSyncState, FrameCompletion};
use glam::DMat4;

use crate::context::{RenderTarget, automatic_uniforms, frustum_uniforms};
use crate::{
    BoundUniformProvider, ClearCommand, DrawCommand, DrawOutcome, FrameContext, Framebuffer,
    GpuTexture, PassState, RenderPipeline, ViewportRect,
};

pub(crate) struct Drawable {
    surface_texture: Option<wgpu::SurfaceTexture>,
    view: wgpu::TextureView,
    size: (u32, u32),
}

pub(crate) struct ActiveFrame {
    drawable: Drawable,
    encoder: wgpu::CommandEncoder,
    completion: FrameCompletion,
    sync_state: BufferSyncState,
    open_passes: usize,
}

/// An open render pass on the frame's encoder. Hand it back with
/// [`FrameContext::complete_render_pass`].
pub struct FrameRenderPass {
    pass: wgpu::RenderPass<'static>,
    viewport: Option<ViewportRect>,
    framebuffer_size: (u32, u32),
    has_depth: bool,
}

impl FrameRenderPass {
    pub fn framebuffer_size(&self) -> (u32, u32) {
        self.framebuffer_size
    }

    pub fn has_depth(&self) -> bool {
        self.has_depth
    }
}

struct TextureNotResident;

fn acquire_drawable(
    device: &wgpu::Device,
    target: &RenderTarget,
) -> Result<Drawable, wgpu::SurfaceError> {
    match target {
        RenderTarget::Surface { surface, config } => {
            let surface_texture = match surface.get_current_texture() {
                Ok(surface_texture) => surface_texture,
                Err(error) => {
                    if matches!(error, wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) {
                        tracing::debug!(%error, "reconfiguring surface");
                        surface.configure(device, config);
                    }
                    return Err(error);
                }
            };
            let view = surface_texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            Ok(Drawable {
                surface_texture: Some(surface_texture),
                view,
                size: (config.width, config.height),
            })
        }
        RenderTarget::Offscreen { texture, size, .. } => Ok(Drawable {
            surface_texture: None,
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            size: *size,
        }),
    }
}

impl FrameContext {
    /// Waits for an in-flight slot, acquires the drawable and uploads this frame's automatic and
    /// whole-frustum uniforms.
    ///
    /// Call after the uniform state has been updated for the frame. On error nothing was begun and
    /// the caller skips the tick.
    pub fn begin_frame(
        &mut self,
    ) -> Result<BufferSyncState, BeginFrameError<wgpu::SurfaceError>> {
        assert!(
            self.frame.is_none(),
            "begin_frame called while a frame is being recorded"
        );
        self.drain_device_errors();
        if self.pacer.would_block() {
            // The next slot's previous submission is the oldest one in flight.
            let oldest = self.submissions[self.pacer.sync_state().index()].clone();
            tracing::trace!(
                in_flight = self.pacer.in_flight(),
                "waiting for the GPU to finish a frame"
            );
            if let Err(error) = self.device.poll(wgpu::PollType::Wait {
                submission_index: oldest,
                timeout: None,
            }) {
                tracing::warn!(%error, "device poll failed while waiting for a frame slot");
            }
        }

        let device = &self.device;
        let target = &self.target;
        let begun = match self.pacer.begin_frame(|| acquire_drawable(device, target)) {
            Ok(begun) => begun,
            Err(error) => {
                tracing::warn!(%error, "frame skipped");
                return Err(error);
            }
        };
        let sync_state = begun.sync_state;
        self.draw_log[sync_state.index()].clear();
        self.uniform_arena.reset();
        self.default_framebuffer.update_from_drawable(
            begun.drawable.view.clone(),
            Some(self.depth_view.clone()),
            begun.drawable.size,
        );
        let encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("context.frame"),
            });
        self.frame = Some(ActiveFrame {
            drawable: begun.drawable,
            encoder,
            completion: begun.completion,
            sync_state,
            open_passes: 0,
        });

        let automatic = automatic_uniforms(&mut self.uniform_state);
        let provider = self.automatic_uniforms.provider();
        provider.write(&self.queue, sync_state, bytemuck::bytes_of(&automatic));
        provider.signal_write_complete(sync_state);

        self.uniform_state.set_model(DMat4::IDENTITY);
        self.update_frustum_uniforms(None);
        tracing::trace!(slot = sync_state.index(), "frame begun");
        Ok(sync_state)
    }

    /// Writes the current frustum transforms into `provider`, or into the whole-frustum provider.
    pub fn update_frustum_uniforms(&mut self, provider: Option<&BoundUniformProvider>) {
        let sync_state = self.active_frame().sync_state;
        let layout = frustum_uniforms(&mut self.uniform_state);
        let provider = provider.unwrap_or(&*self.whole_frustum).provider();
        provider.write(&self.queue, sync_state, bytemuck::bytes_of(&layout));
        provider.signal_write_complete(sync_state);
    }

    pub fn sync_state(&self) -> Option<BufferSyncState> {
        self.frame.as_ref().map(|frame| frame.sync_state)
    }

    /// The frame's encoder, for copies and compute work recorded between passes.
    pub fn command_encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let frame = self.active_frame_mut();
        assert_eq!(
            frame.open_passes, 0,
            "command encoder requested while a render pass is open"
        );
        &mut frame.encoder
    }

    /// The framebuffer bound to the current drawable.
    pub fn default_framebuffer(&self) -> &Framebuffer {
        &self.default_framebuffer
    }

    pub fn create_render_pass(&mut self, pass_state: Option<&PassState>) -> FrameRenderPass {
        let framebuffer = pass_state
            .and_then(|state| state.framebuffer.clone())
            .unwrap_or_else(|| self.default_framebuffer.clone());
        let viewport = pass_state.and_then(|state| state.viewport);
        let frame = self.active_frame_mut();
        let color = framebuffer
            .color
            .as_ref()
            .unwrap_or_else(|| panic!("render pass framebuffer has no color attachment"));
        let keep = wgpu::Operations {
            load: wgpu::LoadOp::Load,
            store: wgpu::StoreOp::Store,
        };
        let pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("context.render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    depth_slice: None,
                    ops: keep,
                })],
                depth_stencil_attachment: framebuffer.depth_stencil.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime();
        frame.open_passes += 1;
        FrameRenderPass {
            pass,
            viewport,
            framebuffer_size: framebuffer.size,
            has_depth: framebuffer.depth_stencil.is_some(),
        }
    }

    pub fn complete_render_pass(&mut self, pass: FrameRenderPass) {
        drop(pass);
        let frame = self.active_frame_mut();
        frame.open_passes = frame
            .open_passes
            .checked_sub(1)
            .unwrap_or_else(|| panic!("complete_render_pass called without an open pass"));
    }

    /// Clears the named attachments of `command.framebuffer`, or of the pass state's framebuffer,
    /// or of the default framebuffer. Must not be called while a render pass is open.
    pub fn clear(&mut self, command: &ClearCommand, pass_state: Option<&PassState>) {
        let framebuffer = command
            .framebuffer
            .clone()
            .or_else(|| pass_state.and_then(|state| state.framebuffer.clone()))
            .unwrap_or_else(|| self.default_framebuffer.clone());
        let frame = self.active_frame_mut();
        assert_eq!(
            frame.open_passes, 0,
            "clear called while a render pass is open"
        );
        let color_attachment = framebuffer.color.as_ref().map(|view| {
            wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                depth_slice: None,
                ops: command.color_ops(),
            }
        });
        let _clear_pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("context.clear"),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: framebuffer.depth_stencil.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(command.depth_ops()),
                    stencil_ops: Some(command.stencil_ops()),
                }
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    /// Records `command` into `pass`.
    ///
    /// Group 0 holds the automatic uniforms, group 1 the frustum uniforms (`frustum` or the whole
    /// frustum), group 2 the command's own uniforms and textures. The command is logged for the
    /// frame before any validation.
    pub fn draw(
        &mut self,
        command: &DrawCommand,
        pass: &mut FrameRenderPass,
        frustum: Option<&BoundUniformProvider>,
    ) -> DrawOutcome {
        let sync_state = self.active_frame().sync_state;
        self.draw_log[sync_state.index()].push(command.clone());

        let pipeline = command
            .pipeline
            .as_ref()
            .unwrap_or_else(|| panic!("draw command {} has no pipeline", command.label));
        assert_eq!(
            pipeline.depth_stencil(),
            pass.has_depth,
            "pipeline {} depth-stencil state does not match the render pass",
            pipeline.label()
        );
        self.uniform_state
            .set_model(command.model_matrix.unwrap_or(DMat4::IDENTITY));

        let manual_bind_group = match self.manual_bind_group(command, pipeline, sync_state) {
            Ok(bind_group) => bind_group,
            Err(TextureNotResident) => {
                tracing::trace!(command = command.label, "texture not resident, draw skipped");
                return DrawOutcome::SkippedTextureNotResident;
            }
        };

        command
            .render_state
            .unwrap_or(*pipeline.render_state())
            .apply(&mut pass.pass, pass.viewport, pass.framebuffer_size);
        pass.pass.set_pipeline(pipeline.raw());
        pass.pass
            .set_bind_group(0, self.automatic_uniforms.bind_group(sync_state), &[]);
        let frustum = frustum.unwrap_or(&*self.whole_frustum);
        pass.pass.set_bind_group(1, frustum.bind_group(sync_state), &[]);
        if let Some(bind_group) = manual_bind_group.as_ref() {
            pass.pass.set_bind_group(2, bind_group, &[]);
        }

        let vertex_array = &command.vertex_array;
        pass.pass
            .set_vertex_buffer(0, vertex_array.vertex_buffer().slice(..));
        match vertex_array.index_buffer() {
            Some(index_buffer) => {
                let range = draw_range(command, index_buffer.count());
                pass.pass
                    .set_index_buffer(index_buffer.buffer().slice(..), index_buffer.datatype().format());
                pass.pass.draw_indexed(range, 0, 0..1);
            }
            None => {
                let range = draw_range(command, vertex_array.vertex_count());
                pass.pass.draw(range, 0..1);
            }
        }
        DrawOutcome::Drawn
    }

    fn manual_bind_group(
        &mut self,
        command: &DrawCommand,
        pipeline: &RenderPipeline,
        sync_state: BufferSyncState,
    ) -> Result<Option<wgpu::BindGroup>, TextureNotResident> {
        let Some(layout) = pipeline.manual_layout() else {
            return Ok(None);
        };
        let uniform_map = command.uniform_map.as_deref().unwrap_or_else(|| {
            panic!(
                "draw command {} has no uniform map for pipeline {}",
                command.label,
                pipeline.label()
            )
        });
        let slots = uniform_map.textures();
        assert_eq!(
            slots.len(),
            pipeline.texture_count(),
            "draw command {} binds {} textures, pipeline {} expects {}",
            command.label,
            slots.len(),
            pipeline.label(),
            pipeline.texture_count()
        );
        let textures = slots
            .iter()
            .map(|slot| slot.load().ok_or(TextureNotResident))
            .collect::<Result<Vec<Arc<GpuTexture>>, _>>()?;

        let mut arena_binding = None;
        let mut entries = Vec::with_capacity(2 + textures.len());
        if pipeline.manual_uniforms() {
            let provider = uniform_map.uniform_buffer().unwrap_or_else(|| {
                panic!("draw command {} has no uniform buffer", command.label)
            });
            let mut bytes = Vec::with_capacity(provider.size() as usize);
            uniform_map.write_uniforms(&mut self.uniform_state, &mut bytes);
            if provider.claim_for_frame(sync_state, self.pacer.frames_begun()) {
                provider.write(&self.queue, sync_state, &bytes);
                provider.signal_write_complete(sync_state);
                entries.push(wgpu::BindGroupEntry {
                    binding: 0,
                    resource: provider.buffer(sync_state).as_entire_binding(),
                });
            } else {
                let (buffer, offset) = self.uniform_arena.allocate(
                    &self.device,
                    &self.queue,
                    sync_state,
                    provider.size(),
                    &bytes,
                );
                arena_binding = Some((buffer, offset, provider.size()));
            }
        }
        if let Some((buffer, offset, size)) = arena_binding.as_ref() {
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer,
                    offset: *offset,
                    size: wgpu::BufferSize::new(*size),
                }),
            });
        }
        if !textures.is_empty() {
            entries.push(wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        for (index, texture) in textures.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + index as u32,
                resource: wgpu::BindingResource::TextureView(texture.view()),
            });
        }
        Ok(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(command.label),
            layout,
            entries: &entries,
        })))
    }

    /// Submits the frame, releases its in-flight token once the GPU finishes, and presents.
    ///
    /// Returns the ring slot the next frame writes.
    pub fn end_frame(&mut self) -> BufferSyncState {
        let frame = self
            .frame
            .take()
            .unwrap_or_else(|| panic!("end_frame called without a begun frame"));
        assert_eq!(
            frame.open_passes, 0,
            "end_frame called with {} render passes still open",
            frame.open_passes
        );
        let submission = self.queue.submit(Some(frame.encoder.finish()));
        self.submissions[frame.sync_state.index()] = Some(submission);
        let completion = frame.completion;
        self.queue.on_submitted_work_done(move || completion.signal());
        if let Some(surface_texture) = frame.drawable.surface_texture {
            surface_texture.present();
        }
        self.default_framebuffer.clear_drawable();
        let next = self.pacer.end_frame();
        tracing::trace!(next_slot = next.index(), "frame submitted");
        next
    }

    pub fn is_frame_active(&self) -> bool {
        self.frame.is_some()
    }

    fn active_frame(&self) -> &ActiveFrame {
        self.frame
            .as_ref()
            .unwrap_or_else(|| panic!("no frame is being recorded"))
    }

    fn active_frame_mut(&mut self) -> &mut ActiveFrame {
        self.frame
            .as_mut()
            .unwrap_or_else(|| panic!("no frame is being recorded"))
    }
}

fn draw_range(command: &DrawCommand, available: u32) -> std::ops::Range<u32> {
    assert!(
        command.offset <= available,
        "draw command {} offset {} exceeds {available} elements",
        command.label,
        command.offset
    );
    let count = command.count.unwrap_or(available - command.offset);
    let end = command
        .offset
        .checked_add(count)
        .filter(|&end| end <= available)
        .unwrap_or_else(|| {
            panic!(
                "draw command {} range {}+{count} exceeds {available} elements",
                command.label, command.offset
            )
        });
    command.offset..end
}
