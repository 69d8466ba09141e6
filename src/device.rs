//! Headset device abstraction
//!
//! A narrow interface over the vendor HMD runtime: pose queries, render
//! target negotiation, controller state and the compositor. The render core
//! only talks to these traits, so it runs headless against a fake device in
//! tests and against the simulated runtime on a desktop.

use std::fmt;

use crate::error::{CompositorError, DeviceInitError};

/// Number of tracked-device slots reported per pose batch.
pub const MAX_TRACKED_DEVICES: usize = 16;

/// Slot of the head-mounted display itself.
pub const HMD_DEVICE_INDEX: usize = 0;

/// Row-major 3x4 rigid transform as reported by the runtime.
pub type HmdMatrix34 = [[f32; 4]; 3];

/// Row-major 4x4 matrix as reported by the runtime.
pub type HmdMatrix44 = [[f32; 4]; 4];

pub const HMD_IDENTITY_34: HmdMatrix34 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// Pose of one tracked device for the current frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedPose {
    pub device_to_absolute_tracking: HmdMatrix34,
    pub pose_is_valid: bool,
}

impl Default for TrackedPose {
    fn default() -> Self {
        Self {
            device_to_absolute_tracking: HMD_IDENTITY_34,
            pose_is_valid: false,
        }
    }
}

/// Controller button bitmask, one bit per button id.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ButtonMask(pub u64);

impl ButtonMask {
    pub const NONE: ButtonMask = ButtonMask(0);
    pub const SYSTEM: ButtonMask = ButtonMask(1 << 0);
    pub const APPLICATION_MENU: ButtonMask = ButtonMask(1 << 1);
    pub const GRIP: ButtonMask = ButtonMask(1 << 2);
    pub const DPAD_LEFT: ButtonMask = ButtonMask(1 << 3);
    pub const DPAD_UP: ButtonMask = ButtonMask(1 << 4);
    pub const DPAD_RIGHT: ButtonMask = ButtonMask(1 << 5);
    pub const DPAD_DOWN: ButtonMask = ButtonMask(1 << 6);
    pub const A: ButtonMask = ButtonMask(1 << 7);
    pub const TOUCHPAD: ButtonMask = ButtonMask(1 << 32);
    pub const TRIGGER: ButtonMask = ButtonMask(1 << 33);

    /// True if any bit of `other` is set in `self`.
    pub fn intersects(self, other: ButtonMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ButtonMask {
    type Output = ButtonMask;

    fn bitor(self, rhs: ButtonMask) -> ButtonMask {
        ButtonMask(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ButtonMask {
    fn bitor_assign(&mut self, rhs: ButtonMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ButtonMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ButtonMask({:#x})", self.0)
    }
}

/// String properties a tracked device can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceProperty {
    TrackingSystemName,
    SerialNumber,
    ModelNumber,
    ManufacturerName,
}

/// General runtime events. Currently only drained and traced.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    TrackedDeviceActivated(usize),
    TrackedDeviceDeactivated(usize),
}

/// UV sub-rectangle of a submitted texture, in 0..=1 texture space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvBounds {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl UvBounds {
    pub const FULL: UvBounds = UvBounds {
        u_min: 0.0,
        v_min: 0.0,
        u_max: 1.0,
        v_max: 1.0,
    };

    /// Half of a side-by-side texture holding `eye`; left eye on the left.
    pub fn for_eye(eye: Eye) -> UvBounds {
        match eye {
            Eye::Left => UvBounds {
                u_max: 0.5,
                ..UvBounds::FULL
            },
            Eye::Right => UvBounds {
                u_min: 0.5,
                ..UvBounds::FULL
            },
        }
    }
}

/// Frame submission to the headset compositor.
///
/// `T` is the texture handle type; the renderer submits `wgpu::Texture`s.
pub trait Compositor<T: ?Sized = wgpu::Texture> {
    fn submit(&mut self, eye: Eye, texture: &T, bounds: UvBounds) -> Result<(), CompositorError>;

    /// Show the runtime's own mirror window (debug aid).
    fn show_mirror_window(&mut self);
}

/// An initialized head-mounted display.
pub trait HmdDevice {
    /// Projection for `eye`, row-major, mapping depth into 0..=1.
    fn projection(&self, eye: Eye, near: f32, far: f32) -> HmdMatrix44;

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34;

    /// Per-eye pixel size the runtime recommends for eye buffers.
    fn recommended_render_target_size(&self) -> (u32, u32);

    /// Block until the compositor wants the next frame, then fill `poses`.
    fn wait_get_poses(&mut self, poses: &mut [TrackedPose; MAX_TRACKED_DEVICES]);

    fn poll_event(&mut self) -> Option<DeviceEvent>;

    /// Button state of a controller slot, `None` if nothing is connected there.
    fn controller_state(&self, device_index: usize) -> Option<ButtonMask>;

    fn string_property(&self, device_index: usize, property: DeviceProperty) -> String;

    /// Obtain the compositor handle.
    fn compositor(&mut self) -> Result<Box<dyn Compositor>, CompositorError>;

    fn shutdown(&mut self);
}

/// Entry point of a headset runtime.
pub trait HmdRuntime {
    fn name(&self) -> &str;

    fn init(&self) -> Result<Box<dyn HmdDevice>, DeviceInitError>;
}

/// Runtime used when no headset support is configured; init always fails.
#[derive(Debug, Default)]
pub struct NoHeadset;

impl HmdRuntime for NoHeadset {
    fn name(&self) -> &str {
        "none"
    }

    fn init(&self) -> Result<Box<dyn HmdDevice>, DeviceInitError> {
        Err(DeviceInitError::NoRuntime)
    }
}
