use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use frame_sync::BufferSyncState;

/// One uniform buffer per ring slot, so the CPU never overwrites a buffer the GPU may still read.
///
/// A slot must be written and then signalled complete before it is bound for the frame.
#[derive(Debug)]
pub struct UniformBufferProvider {
    label: String,
    size: u64,
    buffers: Vec<wgpu::Buffer>,
    write_complete: Vec<AtomicBool>,
    claimed_by_frame: Vec<AtomicU64>,
}

impl UniformBufferProvider {
    pub fn new(device: &wgpu::Device, label: &str, size: u64, slots: usize) -> Self {
        assert!(size > 0, "uniform buffer {label} must not be empty");
        assert!(
            size % wgpu::COPY_BUFFER_ALIGNMENT == 0,
            "uniform buffer {label} size {size} is not 4-byte aligned"
        );
        assert!(slots > 0, "uniform buffer {label} needs at least one slot");
        let buffers = (0..slots)
            .map(|slot| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label}.slot{slot}")),
                    size,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        Self {
            label: label.to_owned(),
            size,
            buffers,
            write_complete: (0..slots).map(|_| AtomicBool::new(false)).collect(),
            claimed_by_frame: (0..slots).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn slots(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer(&self, sync_state: BufferSyncState) -> &wgpu::Buffer {
        &self.buffers[self.slot(sync_state)]
    }

    /// Queues `bytes` into the slot's buffer and marks it pending until signalled.
    pub fn write(&self, queue: &wgpu::Queue, sync_state: BufferSyncState, bytes: &[u8]) {
        let slot = self.slot(sync_state);
        assert!(
            bytes.len() as u64 <= self.size,
            "uniform buffer {} holds {} bytes, got {}",
            self.label,
            self.size,
            bytes.len()
        );
        self.write_complete[slot].store(false, Ordering::Release);
        queue.write_buffer(&self.buffers[slot], 0, bytes);
    }

    pub fn signal_write_complete(&self, sync_state: BufferSyncState) {
        self.write_complete[self.slot(sync_state)].store(true, Ordering::Release);
    }

    pub fn is_write_complete(&self, sync_state: BufferSyncState) -> bool {
        self.write_complete[self.slot(sync_state)].load(Ordering::Acquire)
    }

    /// Marks the slot as used by frame number `frame`. Returns false when an earlier draw of the
    /// same frame already claimed it.
    pub(crate) fn claim_for_frame(&self, sync_state: BufferSyncState, frame: u64) -> bool {
        self.claimed_by_frame[self.slot(sync_state)].swap(frame, Ordering::AcqRel) != frame
    }

    pub(crate) fn assert_bindable(&self, sync_state: BufferSyncState) {
        assert!(
            self.is_write_complete(sync_state),
            "uniform buffer {} bound in slot {} before its write completed",
            self.label,
            sync_state.index()
        );
    }

    fn slot(&self, sync_state: BufferSyncState) -> usize {
        assert_eq!(
            sync_state.slots(),
            self.buffers.len(),
            "uniform buffer {} ring size mismatch",
            self.label
        );
        sync_state.index()
    }
}

/// Per-slot scratch buffer for uniform blocks whose provider is already bound earlier in the
/// frame. Queue writes land before the submission executes, so a second write into the provider's
/// own buffer would overwrite the block an earlier draw reads.
#[derive(Debug)]
pub(crate) struct UniformArena {
    alignment: u64,
    buffers: Vec<wgpu::Buffer>,
    cursor: u64,
}

impl UniformArena {
    const INITIAL_SIZE: u64 = 16 * 1024;

    pub(crate) fn new(device: &wgpu::Device, slots: usize) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        Self {
            alignment,
            buffers: (0..slots)
                .map(|slot| create_arena_buffer(device, slot, Self::INITIAL_SIZE))
                .collect(),
            cursor: 0,
        }
    }

    /// Starts a frame in `sync_state`'s slot; earlier allocations there are finished on the GPU.
    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }

    pub(crate) fn capacity(&self, sync_state: BufferSyncState) -> u64 {
        self.buffers[sync_state.index()].size()
    }

    /// Copies `bytes` into a fresh `size`-byte range and returns the buffer and the range offset.
    pub(crate) fn allocate(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        sync_state: BufferSyncState,
        size: u64,
        bytes: &[u8],
    ) -> (wgpu::Buffer, u64) {
        let slot = sync_state.index();
        let mut offset = self.cursor.next_multiple_of(self.alignment);
        if offset + size > self.buffers[slot].size() {
            // Bind groups created earlier this frame keep the old buffer alive.
            let grown = (self.buffers[slot].size() * 2).max(size.next_multiple_of(self.alignment));
            tracing::debug!(slot, size = grown, "uniform arena grown");
            self.buffers[slot] = create_arena_buffer(device, slot, grown);
            offset = 0;
        }
        queue.write_buffer(&self.buffers[slot], offset, bytes);
        self.cursor = offset + size;
        (self.buffers[slot].clone(), offset)
    }
}

fn create_arena_buffer(device: &wgpu::Device, slot: usize, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("context.uniform_arena.slot{slot}")),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(crate) fn uniform_bind_group_layout(device: &wgpu::Device, label: &str) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// A uniform provider with one prebuilt bind group per slot.
#[derive(Debug)]
pub struct BoundUniformProvider {
    provider: UniformBufferProvider,
    bind_groups: Vec<wgpu::BindGroup>,
}

impl BoundUniformProvider {
    pub(crate) fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        size: u64,
        slots: usize,
    ) -> Self {
        let provider = UniformBufferProvider::new(device, label, size, slots);
        let bind_groups = provider
            .buffers
            .iter()
            .enumerate()
            .map(|(slot, buffer)| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("{label}.bind_group.slot{slot}")),
                    layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffer.as_entire_binding(),
                    }],
                })
            })
            .collect();
        Self {
            provider,
            bind_groups,
        }
    }

    pub fn provider(&self) -> &UniformBufferProvider {
        &self.provider
    }

    pub(crate) fn bind_group(&self, sync_state: BufferSyncState) -> &wgpu::BindGroup {
        self.provider.assert_bindable(sync_state);
        &self.bind_groups[sync_state.index()]
    }
}

/// Recycles frustum uniform providers; a provider returns to the pool when its handle drops.
#[derive(Debug)]
pub struct FrustumUniformPool {
    device: wgpu::Device,
    layout: wgpu::BindGroupLayout,
    size: u64,
    slots: usize,
    recycle_sender: Sender<BoundUniformProvider>,
    recycled: Receiver<BoundUniformProvider>,
    created: usize,
}

impl FrustumUniformPool {
    pub(crate) fn new(
        device: wgpu::Device,
        layout: wgpu::BindGroupLayout,
        size: u64,
        slots: usize,
    ) -> Self {
        let (recycle_sender, recycled) = crossbeam_channel::unbounded();
        Self {
            device,
            layout,
            size,
            slots,
            recycle_sender,
            recycled,
            created: 0,
        }
    }

    pub fn acquire(&mut self) -> PooledFrustumProvider {
        let provider = match self.recycled.try_recv() {
            Ok(provider) => provider,
            Err(_) => {
                let label = format!("context.frustum_uniforms.{}", self.created);
                self.created += 1;
                tracing::trace!(created = self.created, "frustum uniform provider allocated");
                BoundUniformProvider::new(&self.device, &self.layout, &label, self.size, self.slots)
            }
        };
        PooledFrustumProvider {
            provider: Some(provider),
            recycle: self.recycle_sender.clone(),
        }
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn available(&self) -> usize {
        self.recycled.len()
    }
}

#[derive(Debug)]
pub struct PooledFrustumProvider {
    provider: Option<BoundUniformProvider>,
    recycle: Sender<BoundUniformProvider>,
}

impl Deref for PooledFrustumProvider {
    type Target = BoundUniformProvider;

    fn deref(&self) -> &Self::Target {
        self.provider
            .as_ref()
            .unwrap_or_else(|| panic!("pooled frustum provider used after recycle"))
    }
}

impl Drop for PooledFrustumProvider {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            // The pool may already be gone; then the provider is simply freed.
            let _ = self.recycle.send(provider);
        }
    }
}
