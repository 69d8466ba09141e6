//! Pose tracker
//!
//! Caches the per-eye projection and inverted eye-to-head transforms at
//! device init, and refreshes the head pose once per frame from the latest
//! valid HMD pose. Invalid poses leave the previous head pose in place.

use glam::{Mat4, Vec4};
use log::debug;

use crate::device::{
    Eye, HmdDevice, HmdMatrix34, HmdMatrix44, TrackedPose, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES,
};

/// Vertical field of view of the desktop-only preview.
const DESKTOP_FOV_Y: f32 = std::f32::consts::FRAC_PI_2;

/// Static transforms of one eye.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeFrameState {
    pub projection: Mat4,
    /// Inverse of the eye-to-head transform.
    pub head_to_eye: Mat4,
}

pub struct PoseTracker {
    eyes: [EyeFrameState; 2],
    device_poses: [Mat4; MAX_TRACKED_DEVICES],
    raw_poses: [TrackedPose; MAX_TRACKED_DEVICES],
    head_pose: Mat4,
}

impl PoseTracker {
    /// Query and cache the static eye transforms of an initialized device.
    pub fn from_device(device: &dyn HmdDevice, near: f32, far: f32) -> Self {
        let eye_state = |eye: Eye| {
            let state = EyeFrameState {
                projection: hmd44_to_mat4(&device.projection(eye, near, far)),
                head_to_eye: hmd34_to_mat4(&device.eye_to_head_transform(eye)).inverse(),
            };
            debug!(
                "{:?} eye: projection {:?}, head-to-eye {:?}",
                eye, state.projection, state.head_to_eye
            );
            state
        };
        Self::with_eyes([eye_state(Eye::Left), eye_state(Eye::Right)])
    }

    /// Identity head pose and eye offsets with a perspective for the window.
    pub fn desktop(aspect: f32, near: f32, far: f32) -> Self {
        let eye = EyeFrameState {
            projection: desktop_projection(aspect, near, far),
            head_to_eye: Mat4::IDENTITY,
        };
        Self::with_eyes([eye, eye])
    }

    fn with_eyes(eyes: [EyeFrameState; 2]) -> Self {
        Self {
            eyes,
            device_poses: [Mat4::IDENTITY; MAX_TRACKED_DEVICES],
            raw_poses: [TrackedPose::default(); MAX_TRACKED_DEVICES],
            head_pose: Mat4::IDENTITY,
        }
    }

    /// Update the preview projection when the window changes shape.
    pub fn set_desktop_aspect(&mut self, aspect: f32, near: f32, far: f32) {
        let projection = desktop_projection(aspect, near, far);
        for eye in &mut self.eyes {
            eye.projection = projection;
        }
    }

    /// Wait for the latest pose batch and refresh the head pose.
    pub fn update(&mut self, device: &mut dyn HmdDevice) {
        device.wait_get_poses(&mut self.raw_poses);
        self.apply_poses();
    }

    fn apply_poses(&mut self) {
        for (pose, matrix) in self.raw_poses.iter().zip(self.device_poses.iter_mut()) {
            if pose.pose_is_valid {
                *matrix = hmd34_to_mat4(&pose.device_to_absolute_tracking);
            }
        }
        if self.raw_poses[HMD_DEVICE_INDEX].pose_is_valid {
            self.head_pose = self.device_poses[HMD_DEVICE_INDEX].inverse();
        }
    }

    /// Tracking-space to head-space transform.
    pub fn head_pose(&self) -> Mat4 {
        self.head_pose
    }

    /// Last valid device-to-tracking transform of a slot.
    pub fn device_pose(&self, device_index: usize) -> Option<Mat4> {
        self.device_poses.get(device_index).copied()
    }

    pub fn eye(&self, eye: Eye) -> &EyeFrameState {
        &self.eyes[eye.index()]
    }

    /// projection × head-to-eye × head pose.
    pub fn eye_view_projection(&self, eye: Eye) -> Mat4 {
        let state = self.eye(eye);
        state.projection * state.head_to_eye * self.head_pose
    }
}

fn desktop_projection(aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(DESKTOP_FOV_Y, aspect.max(f32::EPSILON), near, far)
}

/// Row-major 3x4 rigid transform to a column-major `Mat4`.
pub fn hmd34_to_mat4(m: &HmdMatrix34) -> Mat4 {
    Mat4::from_cols(
        Vec4::new(m[0][0], m[1][0], m[2][0], 0.0),
        Vec4::new(m[0][1], m[1][1], m[2][1], 0.0),
        Vec4::new(m[0][2], m[1][2], m[2][2], 0.0),
        Vec4::new(m[0][3], m[1][3], m[2][3], 1.0),
    )
}

/// Row-major 4x4 to a column-major `Mat4`.
pub fn hmd44_to_mat4(m: &HmdMatrix44) -> Mat4 {
    Mat4::from_cols_array_2d(m).transpose()
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4Swizzles};

    use super::*;
    use crate::device::fake::{translation, valid, FakeDevice};

    fn head_at(x: f32, y: f32, z: f32) -> [TrackedPose; MAX_TRACKED_DEVICES] {
        let mut poses = [TrackedPose::default(); MAX_TRACKED_DEVICES];
        poses[HMD_DEVICE_INDEX] = valid(translation(x, y, z));
        poses
    }

    #[test]
    fn converts_row_major_translation() {
        let m = hmd34_to_mat4(&translation(1.0, 2.0, 3.0));
        assert_eq!(m.w_axis, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn converts_row_major_projection() {
        let mut raw = [[0.0; 4]; 4];
        raw[3][2] = -1.0;
        raw[0][0] = 2.0;
        let m = hmd44_to_mat4(&raw);
        assert_eq!(m.z_axis.w, -1.0);
        assert_eq!(m.x_axis.x, 2.0);
    }

    #[test]
    fn head_pose_is_inverse_of_hmd_pose() {
        let mut device = FakeDevice::new();
        device.push_poses(head_at(0.0, 1.5, 0.0));
        let mut tracker = PoseTracker::from_device(&device, 0.1, 100.0);
        tracker.update(&mut device);
        let origin = tracker.head_pose().transform_point3(Vec3::new(0.0, 1.5, 0.0));
        assert!(origin.abs_diff_eq(Vec3::ZERO, 1e-6));
    }

    #[test]
    fn invalid_pose_keeps_previous_head_pose() {
        let mut device = FakeDevice::new();
        device.push_poses(head_at(0.5, 0.0, 0.0));
        device.push_poses([TrackedPose::default(); MAX_TRACKED_DEVICES]);
        let mut tracker = PoseTracker::from_device(&device, 0.1, 100.0);

        tracker.update(&mut device);
        let first = tracker.head_pose();
        tracker.update(&mut device);
        assert_eq!(tracker.head_pose(), first);
        assert_ne!(first, Mat4::IDENTITY);
    }

    #[test]
    fn other_slots_update_independently() {
        let mut device = FakeDevice::new();
        let mut poses = [TrackedPose::default(); MAX_TRACKED_DEVICES];
        poses[3] = valid(translation(0.0, 0.0, -1.0));
        device.push_poses(poses);
        let mut tracker = PoseTracker::from_device(&device, 0.1, 100.0);
        tracker.update(&mut device);
        assert_eq!(tracker.device_pose(3).unwrap().w_axis.xyz(), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(tracker.head_pose(), Mat4::IDENTITY);
    }

    #[test]
    fn eyes_differ_when_offsets_differ() {
        let mut device = FakeDevice::new();
        device.push_poses(head_at(0.2, 1.6, -0.3));
        let mut tracker = PoseTracker::from_device(&device, 0.1, 100.0);
        tracker.update(&mut device);
        assert_ne!(
            tracker.eye_view_projection(Eye::Left),
            tracker.eye_view_projection(Eye::Right)
        );
    }

    #[test]
    fn eyes_converge_when_offsets_are_equal() {
        let mut device = FakeDevice::new();
        device.state.borrow_mut().eye_offset = [0.01, 0.01];
        device.push_poses(head_at(0.2, 1.6, -0.3));
        let mut tracker = PoseTracker::from_device(&device, 0.1, 100.0);
        tracker.update(&mut device);
        assert_eq!(
            tracker.eye_view_projection(Eye::Left),
            tracker.eye_view_projection(Eye::Right)
        );
    }

    #[test]
    fn eye_offset_is_inverted_once() {
        let device = FakeDevice::new();
        let tracker = PoseTracker::from_device(&device, 0.1, 100.0);
        let left = tracker.eye(Eye::Left).head_to_eye;
        assert!((left.w_axis.x - 0.032).abs() < 1e-6);
    }

    #[test]
    fn desktop_preview_uses_identity_stereo() {
        let tracker = PoseTracker::desktop(16.0 / 9.0, 0.1, 100.0);
        assert_eq!(
            tracker.eye_view_projection(Eye::Left),
            tracker.eye_view_projection(Eye::Right)
        );
        assert_eq!(tracker.eye(Eye::Left).head_to_eye, Mat4::IDENTITY);
    }
}
