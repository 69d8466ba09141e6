//! Error types for the panorama viewer.
//!
//! Startup errors (`MalformedMesh`, `ShaderCompileError`, GPU/surface setup)
//! are fatal and surface through [`StartupError`]. Device and compositor
//! errors degrade the viewer to desktop-only rendering. Asset errors are
//! absorbed by the caller and only traced.

use std::path::PathBuf;

use thiserror::Error;

use crate::device::Eye;

/// No headset available during device initialization.
#[derive(Debug, Error)]
pub enum DeviceInitError {
    /// No headset runtime is configured or installed.
    #[error("no headset runtime available")]
    NoRuntime,

    /// The runtime is present but no head-mounted display is connected.
    #[error("head-mounted display not found")]
    HmdNotFound,
}

/// Compositor unavailable after a successful device init, or a rejected submit.
#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("compositor unavailable: {0}")]
    Unavailable(String),

    #[error("compositor rejected {eye:?} eye texture: {reason}")]
    Submit { eye: Eye, reason: String },
}

/// A panorama image could not be loaded.
#[derive(Debug, Error)]
pub enum AssetLoadError {
    #[error("panorama not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// The mesh description is corrupt (bad index, unsupported face, bad number).
#[derive(Debug, Error)]
#[error("malformed mesh at line {line}: {reason}")]
pub struct MalformedMesh {
    pub line: usize,
    pub reason: String,
}

impl MalformedMesh {
    pub(crate) fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// WGSL source failed validation.
#[derive(Debug, Error)]
#[error("shader `{label}` failed to compile: {message}")]
pub struct ShaderCompileError {
    pub label: String,
    pub message: String,
}

/// Configuration file could not be read or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that prevent any rendering; `run` aborts with one of these.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Mesh(#[from] MalformedMesh),

    #[error("failed to read mesh {}: {source}", path.display())]
    MeshIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Shader(#[from] ShaderCompileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("failed to create GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),

    #[error(transparent)]
    EventLoop(#[from] winit::error::EventLoopError),
}
