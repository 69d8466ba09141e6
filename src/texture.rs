//! Texture store
//!
//! Decodes panorama images, mirrors them on both axes so the bottom-up UV
//! convention of the mesh samples them the right way round, builds the mip
//! chain on the CPU and uploads it. Exactly one panorama is active; a new
//! one replaces it only once it is fully uploaded.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::{debug, info};
use serde::Deserialize;

use crate::device::Eye;
use crate::error::AssetLoadError;
use crate::events::{Notification, Notifier};
use crate::gpu::GraphicsContext;

/// Which part of the source image each eye sees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StereoMode {
    /// Both eyes see the whole image.
    #[default]
    None,
    /// Left eye top half, right eye bottom half.
    OverUnder,
    /// Left eye left half, right eye right half.
    SideBySide,
}

impl StereoMode {
    /// Guess the layout from the image shape: square images are over/under,
    /// 4:1 images side-by-side, anything else mono.
    pub fn detect(width: u32, height: u32) -> StereoMode {
        if width == 0 || height == 0 {
            return StereoMode::None;
        }
        let aspect = width as f32 / height as f32;
        if (aspect - 1.0).abs() < 0.05 {
            StereoMode::OverUnder
        } else if (aspect - 4.0).abs() < 0.2 {
            StereoMode::SideBySide
        } else {
            StereoMode::None
        }
    }

    /// UV `[scale.x, scale.y, offset.x, offset.y]` for `eye`.
    ///
    /// The uploaded image is mirrored on both axes, so the source's top half
    /// sits at high v and its left half at high u.
    pub fn uv_transform(self, eye: Eye) -> [f32; 4] {
        match (self, eye) {
            (StereoMode::None, _) => [1.0, 1.0, 0.0, 0.0],
            (StereoMode::OverUnder, Eye::Left) => [1.0, 0.5, 0.0, 0.5],
            (StereoMode::OverUnder, Eye::Right) => [1.0, 0.5, 0.0, 0.0],
            (StereoMode::SideBySide, Eye::Left) => [0.5, 1.0, 0.5, 0.0],
            (StereoMode::SideBySide, Eye::Right) => [0.5, 1.0, 0.0, 0.0],
        }
    }
}

/// Configured stereo layout; `auto` defers to [`StereoMode::detect`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StereoModeSetting {
    #[default]
    Auto,
    None,
    OverUnder,
    SideBySide,
}

impl StereoModeSetting {
    pub fn resolve(self, width: u32, height: u32) -> StereoMode {
        match self {
            StereoModeSetting::Auto => StereoMode::detect(width, height),
            StereoModeSetting::None => StereoMode::None,
            StereoModeSetting::OverUnder => StereoMode::OverUnder,
            StereoModeSetting::SideBySide => StereoMode::SideBySide,
        }
    }
}

/// A decoded, mirrored panorama with its full mip chain.
pub struct PanoramaImage {
    pub name: String,
    /// Pixel size of the file on disk.
    pub source_size: (u32, u32),
    /// Level 0 first; each level halves the previous one.
    pub levels: Vec<RgbaImage>,
}

impl PanoramaImage {
    /// Decode `path`, downscaling so no side exceeds `max_dimension`.
    pub fn open(path: &Path, max_dimension: u32) -> Result<Self, AssetLoadError> {
        if !path.is_file() {
            return Err(AssetLoadError::Missing(path.to_path_buf()));
        }
        let decoded = image::open(path).map_err(|source| AssetLoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        Ok(Self::from_rgba(name, decoded.to_rgba8(), max_dimension))
    }

    pub fn from_rgba(name: String, mut image: RgbaImage, max_dimension: u32) -> Self {
        let source_size = image.dimensions();

        let longest = source_size.0.max(source_size.1);
        if longest > max_dimension {
            let scale = max_dimension as f32 / longest as f32;
            let width = ((source_size.0 as f32 * scale).round() as u32).clamp(1, max_dimension);
            let height = ((source_size.1 as f32 * scale).round() as u32).clamp(1, max_dimension);
            debug!(
                "Downscaling {} from {}x{} to {}x{}",
                name, source_size.0, source_size.1, width, height
            );
            image = imageops::resize(&image, width, height, FilterType::Triangle);
        }

        imageops::flip_vertical_in_place(&mut image);
        imageops::flip_horizontal_in_place(&mut image);

        Self {
            name,
            source_size,
            levels: build_mip_chain(image),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.levels[0].dimensions()
    }

    pub fn status_text(&self) -> String {
        format!("{} ({}x{})", self.name, self.source_size.0, self.source_size.1)
    }
}

/// Number of levels down to 1x1 for a `width` x `height` base level.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn build_mip_chain(base: RgbaImage) -> Vec<RgbaImage> {
    let count = mip_level_count(base.width(), base.height()) as usize;
    let mut levels = Vec::with_capacity(count);
    levels.push(base);
    while levels.len() < count {
        let previous = &levels[levels.len() - 1];
        let width = (previous.width() / 2).max(1);
        let height = (previous.height() / 2).max(1);
        let next = imageops::resize(previous, width, height, FilterType::Triangle);
        levels.push(next);
    }
    levels
}

/// A loaded resource together with where it came from.
pub struct Loaded<T> {
    pub resource: T,
    pub path: PathBuf,
    pub mode: StereoMode,
}

/// Single-slot holder; a replacement is swapped in whole.
pub struct ActivePanorama<T> {
    current: Option<Loaded<T>>,
}

impl<T> Default for ActivePanorama<T> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T> ActivePanorama<T> {
    pub fn get(&self) -> Option<&Loaded<T>> {
        self.current.as_ref()
    }

    /// Install `next`, handing back the previous panorama.
    pub fn replace(&mut self, next: Loaded<T>) -> Option<Loaded<T>> {
        self.current.replace(next)
    }

    pub fn take(&mut self) -> Option<Loaded<T>> {
        self.current.take()
    }

    /// Run `load` and swap in what it produces, handing back the previous
    /// panorama. An error leaves the current one in place.
    pub fn load_with<E>(
        &mut self,
        load: impl FnOnce() -> Result<Loaded<T>, E>,
    ) -> Result<Option<Loaded<T>>, E> {
        let next = load()?;
        Ok(self.replace(next))
    }
}

struct GpuPanorama {
    _texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

pub struct TextureStore {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    placeholder: wgpu::BindGroup,
    active: ActivePanorama<GpuPanorama>,
    stereo: StereoModeSetting,
}

impl TextureStore {
    pub fn new(gpu: &GraphicsContext, stereo: StereoModeSetting) -> Self {
        let device = &gpu.device;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Panorama Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        // Wrap horizontally across the 360° seam, clamp at the poles.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Panorama Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        // Grey 1x1 texture drawn until the first panorama arrives.
        let placeholder_image = RgbaImage::from_pixel(1, 1, image::Rgba([38, 38, 46, 255]));
        let placeholder = upload(gpu, "Placeholder Panorama", &[placeholder_image]);
        let placeholder = create_bind_group(device, &layout, &sampler, &placeholder);

        Self {
            layout,
            sampler,
            placeholder,
            active: ActivePanorama::default(),
            stereo,
        }
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    /// Load and activate a panorama.
    ///
    /// On error nothing changes: the previous panorama stays bound.
    pub fn load(
        &mut self,
        gpu: &GraphicsContext,
        path: &Path,
        notifier: &mut Notifier,
    ) -> Result<(), AssetLoadError> {
        let (layout, sampler, stereo) = (&self.layout, &self.sampler, self.stereo);
        let mut status = String::new();

        let previous = self.active.load_with(|| {
            let image = PanoramaImage::open(path, gpu.max_texture_dimension())?;
            let (width, height) = image.source_size;
            let mode = stereo.resolve(width, height);

            let texture = upload(gpu, &image.name, &image.levels);
            let bind_group = create_bind_group(&gpu.device, layout, sampler, &texture);

            info!(
                "Loaded panorama {} ({}x{}, {} mip levels, {:?})",
                path.display(),
                width,
                height,
                image.levels.len(),
                mode
            );
            status = image.status_text();
            Ok::<_, AssetLoadError>(Loaded {
                resource: GpuPanorama {
                    _texture: texture,
                    bind_group,
                },
                path: path.to_path_buf(),
                mode,
            })
        })?;
        drop(previous);

        notifier.emit(Notification::Status(status));
        Ok(())
    }

    /// Bind group of the active panorama, or the placeholder.
    pub fn bind_group(&self) -> &wgpu::BindGroup {
        self.active
            .get()
            .map(|loaded| &loaded.resource.bind_group)
            .unwrap_or(&self.placeholder)
    }

    pub fn stereo_mode(&self) -> StereoMode {
        self.active.get().map(|loaded| loaded.mode).unwrap_or_default()
    }

    /// Release the active panorama.
    pub fn clear(&mut self) {
        if let Some(loaded) = self.active.take() {
            debug!("Released panorama {}", loaded.path.display());
        }
    }
}

fn upload(gpu: &GraphicsContext, label: &str, levels: &[RgbaImage]) -> wgpu::Texture {
    let (width, height) = levels[0].dimensions();
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: levels.len() as u32,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8UnormSrgb,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    for (level, pixels) in levels.iter().enumerate() {
        let (width, height) = pixels.dimensions();
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: level as u32,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
    texture
}

fn create_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    texture: &wgpu::Texture,
) -> wgpu::BindGroup {
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Panorama Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

    fn corner_image(width: u32, height: u32) -> RgbaImage {
        let mut image = RgbaImage::from_pixel(width, height, BLUE);
        image.put_pixel(0, 0, RED);
        image
    }

    #[test]
    fn mirrors_both_axes() {
        let pano = PanoramaImage::from_rgba("p".into(), corner_image(4, 2), 8192);
        assert_eq!(*pano.levels[0].get_pixel(3, 1), RED);
        assert_eq!(*pano.levels[0].get_pixel(0, 0), BLUE);
    }

    #[test]
    fn builds_full_mip_chain() {
        let pano = PanoramaImage::from_rgba("p".into(), corner_image(16, 4), 8192);
        let sizes: Vec<_> = pano.levels.iter().map(|l| l.dimensions()).collect();
        assert_eq!(sizes, vec![(16, 4), (8, 2), (4, 1), (2, 1), (1, 1)]);
        assert_eq!(mip_level_count(16, 4), 5);
        assert_eq!(mip_level_count(1, 1), 1);
    }

    #[test]
    fn oversized_images_are_downscaled() {
        let pano = PanoramaImage::from_rgba("big".into(), corner_image(64, 32), 16);
        assert_eq!(pano.size(), (16, 8));
        assert_eq!(pano.source_size, (64, 32));
        assert_eq!(pano.status_text(), "big (64x32)");
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = PanoramaImage::open(&dir.path().join("gone.jpg"), 8192).err().unwrap();
        assert!(matches!(err, AssetLoadError::Missing(_)));
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        assert!(matches!(
            PanoramaImage::open(&path, 8192),
            Err(AssetLoadError::Decode { .. })
        ));
    }

    #[test]
    fn decodes_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pano.png");
        corner_image(8, 4).save(&path).unwrap();

        let pano = PanoramaImage::open(&path, 8192).unwrap();
        assert_eq!(pano.name, "pano.png");
        assert_eq!(pano.size(), (8, 4));
        assert_eq!(*pano.levels[0].get_pixel(7, 3), RED);
    }

    #[test]
    fn detects_stereo_layout_from_aspect() {
        assert_eq!(StereoMode::detect(4096, 2048), StereoMode::None);
        assert_eq!(StereoMode::detect(4096, 4096), StereoMode::OverUnder);
        assert_eq!(StereoMode::detect(8192, 2048), StereoMode::SideBySide);
        assert_eq!(StereoModeSetting::None.resolve(4096, 4096), StereoMode::None);
    }

    #[test]
    fn eyes_sample_opposite_halves() {
        let left = StereoMode::OverUnder.uv_transform(Eye::Left);
        let right = StereoMode::OverUnder.uv_transform(Eye::Right);
        assert_eq!(left[1], 0.5);
        assert_ne!(left[3], right[3]);
        assert_eq!(
            StereoMode::None.uv_transform(Eye::Left),
            StereoMode::None.uv_transform(Eye::Right)
        );
    }

    fn loaded(id: u32) -> Loaded<u32> {
        Loaded {
            resource: id,
            path: PathBuf::from(format!("{id}.jpg")),
            mode: StereoMode::None,
        }
    }

    #[test]
    fn failed_load_keeps_the_current_panorama() {
        let mut active = ActivePanorama::default();
        assert!(active.load_with(|| Ok::<_, AssetLoadError>(loaded(1))).unwrap().is_none());

        let err = active
            .load_with(|| Err::<Loaded<u32>, _>(AssetLoadError::Missing(PathBuf::from("gone.jpg"))))
            .err()
            .unwrap();
        assert!(matches!(err, AssetLoadError::Missing(_)));
        assert_eq!(active.get().unwrap().resource, 1);
        assert_eq!(active.get().unwrap().path, PathBuf::from("1.jpg"));
    }

    #[test]
    fn decode_failure_reaches_the_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not a png").unwrap();

        let mut active = ActivePanorama::default();
        active.replace(loaded(1));
        let result = active.load_with(|| {
            let image = PanoramaImage::open(&broken, 8192)?;
            Ok::<_, AssetLoadError>(Loaded {
                resource: image.size().0,
                path: broken.clone(),
                mode: StereoMode::None,
            })
        });
        assert!(matches!(result, Err(AssetLoadError::Decode { .. })));
        assert_eq!(active.get().unwrap().resource, 1);
    }

    #[test]
    fn successful_load_hands_back_the_previous_panorama() {
        let mut active = ActivePanorama::default();
        active.replace(loaded(1));
        let previous = active.load_with(|| Ok::<_, AssetLoadError>(loaded(3))).unwrap().unwrap();
        assert_eq!(previous.resource, 1);
        assert_eq!(active.get().unwrap().resource, 3);
        assert_eq!(active.get().unwrap().path, PathBuf::from("3.jpg"));
    }
}
