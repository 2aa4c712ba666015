//! Headless GPU context: the wgpu device/queue boundary the engine renders
//! through. Presentation (surface/swapchain) belongs to the host
//! application; the engine only hands back the final target texture.

use anyhow::{Context, Result};

/// Texture format used for every render target in the engine.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Create a headless context on any available adapter. Fails when the
    /// host has no usable GPU (tests treat that as a skip).
    pub fn new_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("no suitable GPU adapter found")?;

        let adapter_info = adapter.get_info();
        log::debug!("using adapter: {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("fragforge-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .context("failed to create GPU device")?;

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }
}
