//! wgpu panorama renderer
//!
//! Draws the textured sphere into each eye's multisampled target, resolves
//! both into the side-by-side buffer for the compositor, then draws the
//! right eye again straight into the desktop window as a preview.

use std::num::NonZeroU64;
use std::path::Path;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use log::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::{BindGroup, BindGroupLayout, Buffer, RenderPipeline};
use winit::window::Window;

use crate::config::ViewerConfig;
use crate::device::Eye;
use crate::error::{AssetLoadError, StartupError};
use crate::events::Notifier;
use crate::gpu::{self, DesktopSurface, GraphicsContext};
use crate::mesh::{self, Mesh, Vertex};
use crate::render_target::{self, EyeTargets, DEPTH_FORMAT, EYE_COLOR_FORMAT};
use crate::session::{PipelineState, StereoSession};
use crate::texture::{StereoMode, TextureStore};

/// Eye mirrored to the desktop window.
pub const PREVIEW_EYE: Eye = Eye::Right;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PanoramaUniforms {
    view_proj: [[f32; 4]; 4],
    /// xy = UV scale, zw = UV offset.
    uv_transform: [f32; 4],
}

impl PanoramaUniforms {
    pub fn new(view_proj: Mat4, uv_transform: [f32; 4]) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            uv_transform,
        }
    }
}

/// Uniform buffer slots; each draw in a frame reads its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformSlot {
    Eye(Eye),
    Preview,
}

impl UniformSlot {
    const COUNT: u64 = 3;

    fn index(self) -> u64 {
        match self {
            UniformSlot::Eye(eye) => eye.index() as u64,
            UniformSlot::Preview => 2,
        }
    }
}

/// Size of one uniform slot rounded up to the dynamic offset alignment.
pub fn uniform_stride(alignment: u32) -> u64 {
    let size = std::mem::size_of::<PanoramaUniforms>() as u64;
    let alignment = u64::from(alignment.max(1));
    size.div_ceil(alignment) * alignment
}

pub fn slot_offset(slot: UniformSlot, stride: u64) -> u32 {
    (slot.index() * stride) as u32
}

/// Combined transform for one draw: view-projection × sphere scale.
pub fn model_view_projection(view_projection: Mat4, sphere_scale: f32) -> Mat4 {
    view_projection * Mat4::from_scale(Vec3::splat(sphere_scale))
}

struct MeshBuffer {
    buffer: Buffer,
    vertex_count: u32,
}

pub struct Renderer {
    gpu: GraphicsContext,
    surface: DesktopSurface,

    eye_pipeline: RenderPipeline,
    preview_pipeline: RenderPipeline,
    uniform_buffer: Buffer,
    uniform_bind_group: BindGroup,
    uniform_stride: u64,

    textures: TextureStore,
    mesh: Option<MeshBuffer>,
    eye_targets: Option<EyeTargets>,
    preview_depth: (wgpu::Texture, wgpu::TextureView),

    sample_count: u32,
    sphere_scale: f32,
    eye_clear: wgpu::Color,
    preview_clear: wgpu::Color,
    shut_down: bool,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: &ViewerConfig) -> Result<Self, StartupError> {
        let (gpu, surface) = pollster::block_on(gpu::init(window))?;

        let mesh = match &config.mesh {
            Some(path) => mesh::load_obj_file(path)?,
            None => mesh::parse_obj(&mesh::sphere_obj(config.sphere_rings, config.sphere_segments))?,
        };
        info!("Panorama mesh: {} triangles", mesh.triangle_count());

        let shader = gpu.compile_shader("Panorama Shader", include_str!("shaders/panorama.wgsl"))?;

        let uniform_stride = uniform_stride(gpu.device.limits().min_uniform_buffer_offset_alignment);
        let uniform_size = NonZeroU64::new(std::mem::size_of::<PanoramaUniforms>() as u64);
        let uniform_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Panorama Uniforms"),
            size: uniform_stride * UniformSlot::COUNT,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let uniform_layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Panorama Uniform Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: uniform_size,
                },
                count: None,
            }],
        });

        let uniform_bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Panorama Uniform Bind Group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &uniform_buffer,
                    offset: 0,
                    size: uniform_size,
                }),
            }],
        });

        let textures = TextureStore::new(&gpu, config.stereo_mode);
        let sample_count =
            render_target::choose_sample_count(config.msaa_samples, |count| gpu.supports_eye_sample_count(count));

        let eye_pipeline = create_pipeline(
            &gpu,
            "Eye Pipeline",
            &shader,
            &[&uniform_layout, textures.layout()],
            EYE_COLOR_FORMAT,
            sample_count,
        );
        let preview_pipeline = create_pipeline(
            &gpu,
            "Preview Pipeline",
            &shader,
            &[&uniform_layout, textures.layout()],
            surface.format(),
            1,
        );

        let preview_depth = render_target::depth_texture(&gpu, "Preview Depth", surface.size(), 1);
        let mesh = upload_mesh(&gpu, &mesh);

        Ok(Self {
            gpu,
            surface,
            eye_pipeline,
            preview_pipeline,
            uniform_buffer,
            uniform_bind_group,
            uniform_stride,
            textures,
            mesh: Some(mesh),
            eye_targets: None,
            preview_depth,
            sample_count,
            sphere_scale: config.sphere_scale,
            eye_clear: config.eye_clear(),
            preview_clear: config.preview_clear(),
            shut_down: false,
        })
    }

    /// (Re)create both eye targets and the resolve buffer at `eye_size`.
    pub fn allocate_eye_targets(&mut self, eye_size: (u32, u32)) {
        if self.shut_down {
            return;
        }
        if self.eye_targets.as_ref().is_some_and(|t| t.eye_size() == eye_size) {
            return;
        }
        info!(
            "Allocating eye targets: {}x{} per eye, {}x MSAA, resolve {}x{}",
            eye_size.0,
            eye_size.1,
            self.sample_count,
            eye_size.0 * 2,
            eye_size.1
        );
        self.eye_targets = Some(EyeTargets::new(&self.gpu, eye_size, self.sample_count));
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.surface.set_vsync(&self.gpu.device, vsync);
    }

    /// Draw one frame: both eyes and submission when rendering to a headset,
    /// then the desktop preview.
    pub fn render_frame(&mut self, session: &mut StereoSession) {
        if self.shut_down {
            return;
        }
        let mode = self.textures.stereo_mode();

        if session.state() == PipelineState::Rendering {
            if let Some(targets) = &self.eye_targets {
                let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Eye Encoder"),
                });
                for eye in Eye::BOTH {
                    self.write_uniforms(
                        UniformSlot::Eye(eye),
                        PanoramaUniforms::new(
                            model_view_projection(session.eye_view_projection(eye), self.sphere_scale),
                            mode.uv_transform(eye),
                        ),
                    );
                    let target = targets.eye(eye);
                    {
                        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                            label: Some("Eye Pass"),
                            color_attachments: &[Some(target.color_attachment(self.eye_clear))],
                            depth_stencil_attachment: Some(target.depth_attachment()),
                            timestamp_writes: None,
                            occlusion_query_set: None,
                        });
                        self.draw_panorama(&mut pass, &self.eye_pipeline, UniformSlot::Eye(eye));
                    }
                    targets.resolve_buffer().blit_eye(&mut encoder, eye, target);
                }
                self.gpu.queue.submit(std::iter::once(encoder.finish()));
                session.submit(&targets.submission(session.submit_layout()));
            }
        }

        self.render_preview(session, mode);
    }

    fn render_preview(&self, session: &StereoSession, mode: StereoMode) {
        self.write_uniforms(
            UniformSlot::Preview,
            PanoramaUniforms::new(
                model_view_projection(session.eye_view_projection(PREVIEW_EYE), self.sphere_scale),
                mode.uv_transform(PREVIEW_EYE),
            ),
        );

        let Some(frame) = self.surface.acquire(&self.gpu.device) else {
            return;
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self.gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Preview Encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Preview Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.preview_clear),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(render_target::depth_attachment(&self.preview_depth.1)),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.draw_panorama(&mut pass, &self.preview_pipeline, UniformSlot::Preview);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
    }

    fn write_uniforms(&self, slot: UniformSlot, uniforms: PanoramaUniforms) {
        self.gpu.queue.write_buffer(
            &self.uniform_buffer,
            u64::from(slot_offset(slot, self.uniform_stride)),
            bytemuck::bytes_of(&uniforms),
        );
    }

    fn draw_panorama(&self, pass: &mut wgpu::RenderPass<'_>, pipeline: &RenderPipeline, slot: UniformSlot) {
        let Some(mesh) = &self.mesh else {
            return;
        };
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.uniform_bind_group, &[slot_offset(slot, self.uniform_stride)]);
        pass.set_bind_group(1, self.textures.bind_group(), &[]);
        pass.set_vertex_buffer(0, mesh.buffer.slice(..));
        pass.draw(0..mesh.vertex_count, 0..1);
    }

    /// Track the window client area.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface.resize(&self.gpu.device, width, height);
        self.preview_depth = render_target::depth_texture(&self.gpu, "Preview Depth", (width, height), 1);
        debug!("Preview resized to {}x{}", width, height);
    }

    /// Decode and activate a panorama; on error the current one stays.
    pub fn load_panorama(&mut self, path: &Path, notifier: &mut Notifier) -> Result<(), AssetLoadError> {
        self.textures.load(&self.gpu, path, notifier)
    }

    /// Release the texture, mesh, eye targets and resolve buffer, in that
    /// order. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.textures.clear();
        self.mesh = None;
        self.eye_targets = None;
        self.shut_down = true;
        info!("Renderer resources released");
    }
}

fn upload_mesh(gpu: &GraphicsContext, mesh: &Mesh) -> MeshBuffer {
    let buffer = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Panorama Mesh"),
        contents: mesh.as_bytes(),
        usage: wgpu::BufferUsages::VERTEX,
    });
    MeshBuffer {
        buffer,
        vertex_count: mesh.vertex_count(),
    }
}

fn create_pipeline(
    gpu: &GraphicsContext,
    label: &str,
    shader: &wgpu::ShaderModule,
    bind_group_layouts: &[&BindGroupLayout],
    format: wgpu::TextureFormat,
    sample_count: u32,
) -> RenderPipeline {
    let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });

    gpu.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::buffer_layout()],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        // Seen from inside the sphere: no culling.
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState {
            count: sample_count,
            ..Default::default()
        },
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    #[test]
    fn uniforms_fit_one_aligned_slot() {
        assert_eq!(std::mem::size_of::<PanoramaUniforms>(), 80);
        assert_eq!(uniform_stride(256), 256);
        assert_eq!(uniform_stride(64), 128);
    }

    #[test]
    fn each_draw_gets_its_own_slot() {
        let stride = uniform_stride(256);
        assert_eq!(slot_offset(UniformSlot::Eye(Eye::Left), stride), 0);
        assert_eq!(slot_offset(UniformSlot::Eye(Eye::Right), stride), 256);
        assert_eq!(slot_offset(UniformSlot::Preview, stride), 512);
    }

    #[test]
    fn sphere_scale_applies_before_view_projection() {
        let view_proj = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let point = model_view_projection(view_proj, 50.0) * Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert_eq!(point, Vec4::new(1.0, 0.0, -50.0, 1.0));
    }

    #[test]
    fn uniforms_store_column_major_matrix() {
        let m = Mat4::from_translation(Vec3::new(2.0, 3.0, 4.0));
        let uniforms = PanoramaUniforms::new(m, [1.0, 0.5, 0.0, 0.5]);
        assert_eq!(uniforms.view_proj[3], [2.0, 3.0, 4.0, 1.0]);
        assert_eq!(uniforms.uv_transform, [1.0, 0.5, 0.0, 0.5]);
    }
}
