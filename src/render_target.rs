//! Offscreen render targets
//!
//! One reusable multisampled color + depth target with its own single-sample
//! resolve texture, and the shared side-by-side buffer both eyes are
//! blitted into for submission.

use log::warn;

use crate::compositor::{EyeTextures, SubmitLayout};
use crate::device::Eye;
use crate::gpu::GraphicsContext;

pub const EYE_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Sample counts every adapter supports for the eye formats, largest first.
const GUARANTEED_SAMPLE_COUNTS: [u32; 2] = [4, 1];

/// `requested` if `supported` accepts it, otherwise the largest guaranteed
/// count that does not exceed it.
pub fn choose_sample_count(requested: u32, supported: impl Fn(u32) -> bool) -> u32 {
    if supported(requested) {
        return requested;
    }
    let fallback = GUARANTEED_SAMPLE_COUNTS
        .into_iter()
        .find(|&count| count <= requested && supported(count))
        .unwrap_or(1);
    warn!("{}x MSAA is not supported for eye targets, using {}x", requested, fallback);
    fallback
}

/// Depth texture and view of the given size and sample count.
pub fn depth_texture(
    gpu: &GraphicsContext,
    label: &str,
    (width, height): (u32, u32),
    sample_count: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Color + depth target, optionally multisampled, with a resolved copy.
pub struct RenderTarget {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    /// Present only when multisampled; otherwise `color` is already resolved.
    resolve: Option<(wgpu::Texture, wgpu::TextureView)>,
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

impl RenderTarget {
    pub fn new(
        gpu: &GraphicsContext,
        label: &str,
        size: (u32, u32),
        sample_count: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let single_sample = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::TEXTURE_BINDING;

        let make_color = |name: String, samples: u32, usage: wgpu::TextureUsages| {
            let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(name.as_str()),
                size: wgpu::Extent3d {
                    width: size.0,
                    height: size.1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: samples,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            (texture, view)
        };

        let (color, color_view, resolve) = if sample_count > 1 {
            let (color, view) = make_color(
                format!("{label} MSAA Color"),
                sample_count,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );
            let resolve = make_color(format!("{label} Resolve"), 1, single_sample);
            (color, view, Some(resolve))
        } else {
            let (color, view) = make_color(format!("{label} Color"), 1, single_sample);
            (color, view, None)
        };

        let (depth, depth_view) = depth_texture(gpu, &format!("{label} Depth"), size, sample_count);

        Self {
            color,
            color_view,
            resolve,
            _depth: depth,
            depth_view,
        }
    }

    /// Clears, renders into the color target and resolves at end of pass.
    pub fn color_attachment(&self, clear: wgpu::Color) -> wgpu::RenderPassColorAttachment<'_> {
        wgpu::RenderPassColorAttachment {
            view: &self.color_view,
            resolve_target: self.resolve.as_ref().map(|(_, view)| view),
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(clear),
                store: wgpu::StoreOp::Store,
            },
        }
    }

    pub fn depth_attachment(&self) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        depth_attachment(&self.depth_view)
    }

    /// Single-sample texture holding the finished image.
    pub fn resolved(&self) -> &wgpu::Texture {
        self.resolve.as_ref().map(|(texture, _)| texture).unwrap_or(&self.color)
    }
}

/// Clear-to-far depth attachment for `view`.
pub fn depth_attachment(view: &wgpu::TextureView) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: wgpu::LoadOp::Clear(1.0),
            store: wgpu::StoreOp::Discard,
        }),
        stencil_ops: None,
    }
}

/// Where `eye` lands in a side-by-side buffer of per-eye width `eye_width`.
pub fn blit_origin(eye: Eye, eye_width: u32) -> wgpu::Origin3d {
    wgpu::Origin3d {
        x: eye.index() as u32 * eye_width,
        y: 0,
        z: 0,
    }
}

/// Size of the side-by-side buffer for a per-eye size.
pub fn side_by_side_size((width, height): (u32, u32)) -> (u32, u32) {
    (width * 2, height)
}

/// Resolved side-by-side composite, 2 × eye width by eye height.
pub struct ResolveBuffer {
    texture: wgpu::Texture,
    eye_size: (u32, u32),
}

impl ResolveBuffer {
    pub fn new(gpu: &GraphicsContext, eye_size: (u32, u32), format: wgpu::TextureFormat) -> Self {
        let (width, height) = side_by_side_size(eye_size);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Side-by-Side Resolve"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self { texture, eye_size }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Copy an eye's resolved image into its half.
    pub fn blit_eye(&self, encoder: &mut wgpu::CommandEncoder, eye: Eye, source: &RenderTarget) {
        let (width, height) = self.eye_size;
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: source.resolved(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: blit_origin(eye, width),
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// Both eye targets plus the side-by-side buffer, sized to one negotiation.
///
/// Field order is drop order: eye targets go before the resolve buffer.
pub struct EyeTargets {
    eyes: [RenderTarget; 2],
    resolve: ResolveBuffer,
}

impl EyeTargets {
    pub fn new(gpu: &GraphicsContext, eye_size: (u32, u32), sample_count: u32) -> Self {
        let target = |label| RenderTarget::new(gpu, label, eye_size, sample_count, EYE_COLOR_FORMAT);
        Self {
            eyes: [target("Left Eye"), target("Right Eye")],
            resolve: ResolveBuffer::new(gpu, eye_size, EYE_COLOR_FORMAT),
        }
    }

    pub fn eye_size(&self) -> (u32, u32) {
        self.resolve.eye_size
    }

    pub fn eye(&self, eye: Eye) -> &RenderTarget {
        &self.eyes[eye.index()]
    }

    pub fn resolve_buffer(&self) -> &ResolveBuffer {
        &self.resolve
    }

    /// Textures to hand the compositor for `layout`.
    pub fn submission(&self, layout: SubmitLayout) -> EyeTextures<'_, wgpu::Texture> {
        match layout {
            SubmitLayout::SideBySide => EyeTextures::SideBySide(self.resolve.texture()),
            SubmitLayout::PerEye => EyeTextures::PerEye {
                left: self.eye(Eye::Left).resolved(),
                right: self.eye(Eye::Right).resolved(),
            },
        }
    }
}
