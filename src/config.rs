//! Viewer configuration
//!
//! Loaded from an optional YAML file with kebab-case keys; every key has a
//! default so an empty file (or no file) is a valid configuration.

use std::path::{Path, PathBuf};

use log::info;
use serde::Deserialize;

use crate::compositor::SubmitLayout;
use crate::error::ConfigError;
use crate::texture::StereoModeSetting;

/// Which headset runtime to bring up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// No headset runtime; the viewer runs desktop-only.
    #[default]
    None,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ViewerConfig {
    pub runtime: RuntimeKind,
    pub panorama: Option<PathBuf>,
    /// OBJ file replacing the built-in sphere.
    pub mesh: Option<PathBuf>,
    pub sphere_rings: u32,
    pub sphere_segments: u32,
    pub sphere_scale: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    pub msaa_samples: u32,
    pub stereo_mode: StereoModeSetting,
    pub submit_layout: SubmitLayout,
    pub show_mirror_window: bool,
    pub eye_clear_color: [f64; 3],
    pub preview_clear_color: [f64; 3],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::None,
            panorama: None,
            mesh: None,
            sphere_rings: 32,
            sphere_segments: 64,
            sphere_scale: 50.0,
            near_clip: 0.1,
            far_clip: 10_000.0,
            msaa_samples: 4,
            stereo_mode: StereoModeSetting::Auto,
            submit_layout: SubmitLayout::SideBySide,
            show_mirror_window: false,
            eye_clear_color: [0.15, 0.15, 0.18],
            preview_clear_color: [0.0, 0.0, 0.0],
        }
    }
}

impl ViewerConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit, not as an empty map.
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ViewerConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&source)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.near_clip > 0.0) {
            return invalid(format!("near-clip must be positive, got {}", self.near_clip));
        }
        if !(self.far_clip > self.near_clip) {
            return invalid(format!(
                "far-clip ({}) must be greater than near-clip ({})",
                self.far_clip, self.near_clip
            ));
        }
        if !(self.sphere_scale > self.near_clip) {
            return invalid(format!(
                "sphere-scale ({}) must place the sphere beyond near-clip ({})",
                self.sphere_scale, self.near_clip
            ));
        }
        if self.sphere_scale >= self.far_clip {
            return invalid(format!(
                "sphere-scale ({}) must be inside far-clip ({})",
                self.sphere_scale, self.far_clip
            ));
        }
        if ![1, 2, 4, 8].contains(&self.msaa_samples) {
            return invalid(format!("msaa-samples must be 1, 2, 4 or 8, got {}", self.msaa_samples));
        }
        if self.sphere_rings < 2 {
            return invalid(format!("sphere-rings must be at least 2, got {}", self.sphere_rings));
        }
        if self.sphere_segments < 3 {
            return invalid(format!("sphere-segments must be at least 3, got {}", self.sphere_segments));
        }
        Ok(())
    }

    pub fn eye_clear(&self) -> wgpu::Color {
        to_color(self.eye_clear_color)
    }

    pub fn preview_clear(&self) -> wgpu::Color {
        to_color(self.preview_clear_color)
    }
}

fn to_color([r, g, b]: [f64; 3]) -> wgpu::Color {
    wgpu::Color { r, g, b, a: 1.0 }
}
