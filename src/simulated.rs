//! Simulated headset
//!
//! A stand-in runtime for machines without VR hardware. It reports a
//! plausible per-eye projection and IPD, paces `wait_get_poses` to a 90 Hz
//! display, drifts the head gently, and exposes desktop gamepads as
//! controllers. Submitted frames are counted and dropped.

use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

use glam::{EulerRot, Mat4, Quat, Vec3};
use log::{info, trace};

use crate::device::{
    ButtonMask, Compositor, DeviceEvent, DeviceProperty, Eye, HmdDevice, HmdMatrix34, HmdMatrix44,
    HmdRuntime, TrackedPose, UvBounds, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES,
};
use crate::error::{CompositorError, DeviceInitError};
use crate::gamepad::GamepadControllers;

/// Interpupillary distance in meters.
pub const SIMULATED_IPD: f32 = 0.063;
pub const SIMULATED_EYE_SIZE: (u32, u32) = (1512, 1680);
const FRAME_INTERVAL: Duration = Duration::from_micros(11_111);
const FOV_Y_DEGREES: f32 = 100.0;

pub const TRACKING_SYSTEM: &str = "simulated";
pub const SERIAL_NUMBER: &str = "SIM-0001";

pub struct SimulatedRuntime;

impl HmdRuntime for SimulatedRuntime {
    fn name(&self) -> &str {
        TRACKING_SYSTEM
    }

    fn init(&self) -> Result<Box<dyn HmdDevice>, DeviceInitError> {
        info!("Starting simulated headset ({}x{} per eye)", SIMULATED_EYE_SIZE.0, SIMULATED_EYE_SIZE.1);
        Ok(Box::new(SimulatedHmd::new(GamepadControllers::new())))
    }
}

pub struct SimulatedHmd {
    started: Instant,
    next_frame: Instant,
    gamepads: GamepadControllers,
    pending: VecDeque<DeviceEvent>,
    shut_down: bool,
}

impl SimulatedHmd {
    pub fn new(gamepads: GamepadControllers) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            next_frame: now + FRAME_INTERVAL,
            gamepads,
            pending: VecDeque::new(),
            shut_down: false,
        }
    }

    /// Block until the next display interval.
    fn pace(&mut self) {
        let now = Instant::now();
        if self.next_frame > now {
            thread::sleep(self.next_frame - now);
            self.next_frame += FRAME_INTERVAL;
        } else {
            // Fell behind: restart the cadence instead of bursting.
            self.next_frame = now + FRAME_INTERVAL;
        }
    }
}

/// Head orientation after `t` seconds: slow breathing pitch, sway roll and a
/// gentle look around.
pub fn simulated_head_pose(t: f32) -> Mat4 {
    let breathing = (t * 0.5).sin() * 0.01;
    let sway = (t * 0.3).sin() * 0.005;
    let look = (t * 0.1).sin() * 0.6;
    Mat4::from_quat(Quat::from_euler(EulerRot::YXZ, look, breathing, sway))
}

/// Row-major 3x4 from a column-major affine matrix.
pub fn mat4_to_hmd34(m: Mat4) -> HmdMatrix34 {
    let rows = m.transpose().to_cols_array_2d();
    [rows[0], rows[1], rows[2]]
}

/// Row-major 4x4 from a column-major matrix.
pub fn mat4_to_hmd44(m: Mat4) -> HmdMatrix44 {
    m.transpose().to_cols_array_2d()
}

impl HmdDevice for SimulatedHmd {
    fn projection(&self, _eye: Eye, near: f32, far: f32) -> HmdMatrix44 {
        let aspect = SIMULATED_EYE_SIZE.0 as f32 / SIMULATED_EYE_SIZE.1 as f32;
        mat4_to_hmd44(Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, near, far))
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        let half = SIMULATED_IPD / 2.0;
        let x = match eye {
            Eye::Left => -half,
            Eye::Right => half,
        };
        mat4_to_hmd34(Mat4::from_translation(Vec3::new(x, 0.0, 0.0)))
    }

    fn recommended_render_target_size(&self) -> (u32, u32) {
        SIMULATED_EYE_SIZE
    }

    fn wait_get_poses(&mut self, poses: &mut [TrackedPose; MAX_TRACKED_DEVICES]) {
        self.pace();
        // One gamepad drain per frame, so taps stay visible until the next one.
        self.pending.extend(self.gamepads.pump());
        let t = self.started.elapsed().as_secs_f32();
        poses[HMD_DEVICE_INDEX] = TrackedPose {
            device_to_absolute_tracking: mat4_to_hmd34(simulated_head_pose(t)),
            pose_is_valid: true,
        };
    }

    fn poll_event(&mut self) -> Option<DeviceEvent> {
        self.pending.pop_front()
    }

    fn controller_state(&self, device_index: usize) -> Option<ButtonMask> {
        if device_index == HMD_DEVICE_INDEX {
            return None;
        }
        self.gamepads.state(device_index)
    }

    fn string_property(&self, device_index: usize, property: DeviceProperty) -> String {
        if device_index != HMD_DEVICE_INDEX {
            return String::new();
        }
        match property {
            DeviceProperty::TrackingSystemName => TRACKING_SYSTEM,
            DeviceProperty::SerialNumber => SERIAL_NUMBER,
            DeviceProperty::ModelNumber => "Simulated HMD",
            DeviceProperty::ManufacturerName => "vr_panorama",
        }
        .to_string()
    }

    fn compositor(&mut self) -> Result<Box<dyn Compositor>, CompositorError> {
        if self.shut_down {
            return Err(CompositorError::Unavailable("simulated headset is shut down".into()));
        }
        Ok(Box::new(SimulatedCompositor::default()))
    }

    fn shutdown(&mut self) {
        if !self.shut_down {
            info!("Simulated headset shut down");
            self.shut_down = true;
        }
    }
}

/// Accepts every frame with non-empty bounds and keeps a count.
#[derive(Debug, Default)]
pub struct SimulatedCompositor {
    submitted: u64,
}

impl SimulatedCompositor {
    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}

impl<T: ?Sized> Compositor<T> for SimulatedCompositor {
    fn submit(&mut self, eye: Eye, _texture: &T, bounds: UvBounds) -> Result<(), CompositorError> {
        if bounds.u_max <= bounds.u_min || bounds.v_max <= bounds.v_min {
            return Err(CompositorError::Submit {
                eye,
                reason: format!("empty texture bounds {:?}", bounds),
            });
        }
        self.submitted += 1;
        trace!("Simulated submit #{} {:?} {:?}", self.submitted, eye, bounds);
        Ok(())
    }

    fn show_mirror_window(&mut self) {
        info!("Simulated compositor has no mirror window; the desktop preview serves instead");
    }
}
