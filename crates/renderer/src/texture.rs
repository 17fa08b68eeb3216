use std::sync::Arc;

use arc_swap::ArcSwapOption;

pub const IMAGERY_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// A 2D RGBA texture with a full-texture view.
#[derive(Debug)]
pub struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    mip_level_count: u32,
}

impl GpuTexture {
    /// Levels down to 1x1.
    pub fn mip_levels_for(width: u32, height: u32) -> u32 {
        let largest = width.max(height).max(1);
        u32::BITS - largest.leading_zeros()
    }

    pub fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, mipmapped: bool) -> Self {
        assert!(
            width > 0 && height > 0,
            "texture {label} has empty size {width}x{height}"
        );
        let mip_level_count = if mipmapped {
            Self::mip_levels_for(width, height)
        } else {
            1
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: IMAGERY_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            mip_level_count,
        }
    }

    /// Uploads tightly packed RGBA8 pixels into level 0.
    pub fn from_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
        mipmapped: bool,
    ) -> Self {
        let expected = width as usize * height as usize * 4;
        assert_eq!(
            pixels.len(),
            expected,
            "texture {label} expects {expected} RGBA bytes for {width}x{height}"
        );
        let texture = Self::new(device, label, width, height, mipmapped);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            texture.extent(),
        );
        texture
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    pub(crate) fn mip_view(&self, level: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("texture.mip_view"),
            base_mip_level: level,
            mip_level_count: Some(1),
            ..Default::default()
        })
    }
}

/// A texture binding that may not be resident yet. Draws needing an empty slot are skipped.
#[derive(Debug, Clone)]
pub struct TextureSlot(Arc<ArcSwapOption<GpuTexture>>);

impl Default for TextureSlot {
    fn default() -> Self {
        Self(Arc::new(ArcSwapOption::empty()))
    }
}

impl TextureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resident(texture: Arc<GpuTexture>) -> Self {
        let slot = Self::default();
        slot.set(texture);
        slot
    }

    pub fn set(&self, texture: Arc<GpuTexture>) {
        self.0.store(Some(texture));
    }

    pub fn clear(&self) {
        self.0.store(None);
    }

    pub fn load(&self) -> Option<Arc<GpuTexture>> {
        self.0.load_full()
    }

    pub fn is_resident(&self) -> bool {
        self.0.load().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(GpuTexture::mip_levels_for(1, 1), 1);
        assert_eq!(GpuTexture::mip_levels_for(256, 256), 9);
        assert_eq!(GpuTexture::mip_levels_for(256, 100), 9);
        assert_eq!(GpuTexture::mip_levels_for(257, 1), 9);
    }

    #[test]
    fn empty_slot_is_not_resident() {
        let slot = TextureSlot::new();
        assert!(!slot.is_resident());
        assert!(slot.load().is_none());
        let shared = slot.clone();
        shared.clear();
        assert!(!slot.is_resident());
    }
}
