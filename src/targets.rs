//! Render target lifecycle: per-(asset, mode) GPU textures, the shared
//! black fallback, static image uploads, and resolution-change tracking.
//!
//! Targets are keyed by asset id and [`TargetMode`]; a node can carry a
//! small preview target and a full-resolution target side by side. On
//! resize the replacement texture is created first and the stale one is
//! released afterwards, so a target is never torn mid-frame.

use std::collections::HashMap;

use crate::assets::AssetId;
use crate::gpu::{GpuContext, TARGET_FORMAT};

/// Preview targets use a fixed small resolution, independent of the output
/// resolution.
pub const PREVIEW_SIZE: (u32, u32) = (128, 128);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetMode {
    Preview,
    Full,
}

#[derive(Debug)]
pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: (u32, u32),
}

fn create_cleared_target(
    gpu: &GpuContext,
    label: &str,
    width: u32,
    height: u32,
    clear_rgba: [u8; 4],
) -> RenderTarget {
    // Zero-size allocations fail; clamp to 1x1.
    let width = width.max(1);
    let height = height.max(1);
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        pixels.extend_from_slice(&clear_rgba);
    }
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &pixels,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(4 * width),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    RenderTarget {
        texture,
        view,
        size: (width, height),
    }
}

pub struct RenderTargetCache {
    targets: HashMap<(AssetId, TargetMode), RenderTarget>,
    /// Decoded Image-kind assets, uploaded once.
    images: HashMap<AssetId, RenderTarget>,
    /// Shared immutable fallback bound for every unresolved slot.
    black: RenderTarget,
    last_full_size: Option<(u32, u32)>,
    resolution_changed: bool,
}

impl RenderTargetCache {
    pub fn new(gpu: &GpuContext) -> Self {
        let black = create_cleared_target(gpu, "fragforge-black", 1, 1, [0, 0, 0, 255]);
        Self {
            targets: HashMap::new(),
            images: HashMap::new(),
            black,
            last_full_size: None,
            resolution_changed: false,
        }
    }

    pub fn black(&self) -> &RenderTarget {
        &self.black
    }

    /// Make sure a target of exactly (width, height) exists for the asset in
    /// the given mode, allocating or replacing as needed. Fresh targets are
    /// cleared to transparent black (Preview) or opaque black (Full).
    pub fn ensure(&mut self, gpu: &GpuContext, id: AssetId, mode: TargetMode, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        let key = (id, mode);
        if self
            .targets
            .get(&key)
            .is_some_and(|t| t.size == (width, height))
        {
            return;
        }
        let clear = match mode {
            TargetMode::Preview => [0, 0, 0, 0],
            TargetMode::Full => [0, 0, 0, 255],
        };
        let fresh = create_cleared_target(gpu, "fragforge-target", width, height, clear);
        // Insert first; the stale target is released only after the
        // replacement exists.
        let stale = self.targets.insert(key, fresh);
        drop(stale);
    }

    pub fn get(&self, id: AssetId, mode: TargetMode) -> Option<&RenderTarget> {
        self.targets.get(&(id, mode))
    }

    /// Decode and upload an Image asset's bytes, cached per asset. Returns
    /// `None` (falling back to black) when decoding fails.
    pub fn ensure_image(&mut self, gpu: &GpuContext, id: AssetId, bytes: &[u8]) -> Option<&RenderTarget> {
        if !self.images.contains_key(&id) {
            let decoded = match image::load_from_memory(bytes) {
                Ok(img) => img.to_rgba8(),
                Err(err) => {
                    log::error!("failed to decode image asset {id:?}: {err}");
                    return None;
                }
            };
            let (width, height) = decoded.dimensions();
            let target = create_cleared_target(gpu, "fragforge-image", width, height, [0, 0, 0, 0]);
            gpu.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &target.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &decoded,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
            self.images.insert(id, target);
        }
        self.images.get(&id)
    }

    pub fn get_image(&self, id: AssetId) -> Option<&RenderTarget> {
        self.images.get(&id)
    }

    /// Record the requested full-mode output resolution; flags
    /// [`Self::take_resolution_changed`] when it differs from the previous
    /// frame's. Never blocks rendering.
    pub fn note_full_resolution(&mut self, width: u32, height: u32) {
        let size = (width.max(1), height.max(1));
        if self.last_full_size != Some(size) {
            if self.last_full_size.is_some() {
                self.resolution_changed = true;
            }
            self.last_full_size = Some(size);
        }
    }

    /// One-shot signal for the host UI that the graph output size changed.
    pub fn take_resolution_changed(&mut self) -> bool {
        std::mem::take(&mut self.resolution_changed)
    }

    /// Drop all cached textures for a removed asset.
    pub fn purge(&mut self, id: AssetId) {
        self.targets.remove(&(id, TargetMode::Preview));
        self.targets.remove(&(id, TargetMode::Full));
        self.images.remove(&id);
    }
}
