//! GPU initialization
//!
//! The device and queue travel through the renderer as an explicit
//! [`GraphicsContext`]; the desktop window surface is owned separately.

use std::sync::Arc;

use log::{error, info};
use wgpu::{
    Backends, Device, DeviceDescriptor, Features, Instance, InstanceDescriptor, Queue, Surface,
    SurfaceConfiguration, TextureFormatFeatureFlags, TextureUsages,
};
use winit::window::Window;

use crate::error::{ShaderCompileError, StartupError};
use crate::render_target::{DEPTH_FORMAT, EYE_COLOR_FORMAT};

/// Device and queue shared by every GPU-owning component.
pub struct GraphicsContext {
    pub device: Device,
    pub queue: Queue,
    /// Format features shared by the eye color and depth formats.
    eye_format_flags: TextureFormatFeatureFlags,
}

impl GraphicsContext {
    /// Whether eye targets can be created with `count` samples.
    pub fn supports_eye_sample_count(&self, count: u32) -> bool {
        self.eye_format_flags.sample_count_supported(count)
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Compile WGSL, turning validation failures into an error.
    pub fn compile_shader(&self, label: &str, source: &str) -> Result<wgpu::ShaderModule, ShaderCompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(ShaderCompileError {
                label: label.to_string(),
                message: e.to_string(),
            }),
            None => Ok(module),
        }
    }
}

/// Swapchain of the desktop preview window.
pub struct DesktopSurface {
    surface: Surface<'static>,
    config: SurfaceConfiguration,
}

impl DesktopSurface {
    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub fn resize(&mut self, device: &Device, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(device, &self.config);
        }
    }

    /// Vsync only when the desktop window is the sole output; with a headset
    /// the device paces the loop.
    pub fn set_vsync(&mut self, device: &Device, vsync: bool) {
        self.config.present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        self.surface.configure(device, &self.config);
    }

    /// Next frame, reconfiguring once if the swapchain went stale.
    pub fn acquire(&self, device: &Device) -> Option<wgpu::SurfaceTexture> {
        match self.surface.get_current_texture() {
            Ok(frame) => Some(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(device, &self.config);
                None
            }
            Err(e) => {
                error!("Failed to acquire surface texture: {}", e);
                None
            }
        }
    }
}

/// Create the adapter, device and window surface.
pub async fn init(window: Arc<Window>) -> Result<(GraphicsContext, DesktopSurface), StartupError> {
    let size = window.inner_size();

    let instance = Instance::new(&InstanceDescriptor {
        backends: Backends::PRIMARY,
        ..Default::default()
    });

    let surface = instance.create_surface(window)?;

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        })
        .await
        .ok_or(StartupError::NoAdapter)?;
    info!("GPU adapter: {:?}", adapter.get_info());

    let (device, queue) = adapter
        .request_device(
            &DeviceDescriptor {
                label: Some("Panorama Device"),
                // Unlocks MSAA counts beyond the guaranteed 1 and 4 where the adapter has them.
                required_features: adapter.features() & Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                required_limits: adapter.limits(),
                ..Default::default()
            },
            None,
        )
        .await?;

    device.on_uncaptured_error(Box::new(|e: wgpu::Error| {
        error!("GPU error: {}", e);
    }));

    let format_flags = |format: wgpu::TextureFormat| {
        if device.features().contains(Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
            adapter.get_texture_format_features(format).flags
        } else {
            format.guaranteed_format_features(device.features()).flags
        }
    };
    let eye_format_flags = format_flags(EYE_COLOR_FORMAT) & format_flags(DEPTH_FORMAT);

    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .copied()
        .find(|f| f.is_srgb())
        .unwrap_or(surface_caps.formats[0]);

    let config = SurfaceConfiguration {
        usage: TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode: surface_caps.alpha_modes[0],
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&device, &config);

    let gpu = GraphicsContext {
        device,
        queue,
        eye_format_flags,
    };
    Ok((gpu, DesktopSurface { surface, config }))
}
