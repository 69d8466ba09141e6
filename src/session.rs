//! Stereo session state machine
//!
//! `Uninitialized → DeviceReady → Rendering`, with `DesktopOnly` as the
//! degraded state when the headset or its compositor is unavailable, and
//! `ShutDown` as the terminal state. GPU resources live in the renderer;
//! the session owns the device handle, the pose tracker and the
//! compositor bridge.

use log::{error, info, warn};

use crate::compositor::{CompositorBridge, EyeTextures, SubmitLayout};
use crate::device::{DeviceProperty, Eye, HmdDevice, HmdRuntime, HMD_DEVICE_INDEX};
use crate::events::{Notification, Notifier};
use crate::pose::PoseTracker;

const APP_NAME: &str = "Panorama Viewer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    DeviceReady,
    Rendering,
    /// No headset: only the desktop preview is drawn.
    DesktopOnly,
    ShutDown,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    pub near_clip: f32,
    pub far_clip: f32,
    pub submit_layout: SubmitLayout,
    pub show_mirror_window: bool,
    /// Aspect ratio of the desktop window, used for the preview projection.
    pub desktop_aspect: f32,
}

pub struct StereoSession {
    state: PipelineState,
    settings: SessionSettings,
    device: Option<Box<dyn HmdDevice>>,
    bridge: Option<CompositorBridge>,
    poses: PoseTracker,
}

impl StereoSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            state: PipelineState::Uninitialized,
            poses: PoseTracker::desktop(settings.desktop_aspect, settings.near_clip, settings.far_clip),
            settings,
            device: None,
            bridge: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// True once a device and compositor were negotiated.
    pub fn is_stereo(&self) -> bool {
        matches!(self.state, PipelineState::DeviceReady | PipelineState::Rendering)
    }

    /// Bring up the headset. Failures degrade to `DesktopOnly` and are not retried.
    pub fn initialize(&mut self, runtime: &dyn HmdRuntime, notifier: &mut Notifier) -> PipelineState {
        if self.state != PipelineState::Uninitialized {
            warn!("Session already initialized ({:?}), ignoring", self.state);
            return self.state;
        }

        let mut device = match runtime.init() {
            Ok(device) => device,
            Err(e) => {
                error!("Unable to init VR ({} runtime): {}", runtime.name(), e);
                notifier.emit(Notification::CriticalError(format!("Unable to init VR: {e}")));
                self.state = PipelineState::DesktopOnly;
                return self.state;
            }
        };

        let poses = PoseTracker::from_device(device.as_ref(), self.settings.near_clip, self.settings.far_clip);

        let identity = format!(
            "{} - {} {}",
            APP_NAME,
            device.string_property(HMD_DEVICE_INDEX, DeviceProperty::TrackingSystemName),
            device.string_property(HMD_DEVICE_INDEX, DeviceProperty::SerialNumber)
        );
        info!("Headset initialized: {}", identity);
        notifier.emit(Notification::DeviceIdentity(identity));

        match CompositorBridge::negotiate(device.as_mut(), self.settings.submit_layout) {
            Ok(mut bridge) => {
                if self.settings.show_mirror_window {
                    bridge.show_mirror_window();
                }
                self.bridge = Some(bridge);
                self.device = Some(device);
                self.poses = poses;
                self.state = PipelineState::DeviceReady;
            }
            Err(e) => {
                error!("Compositor initialization failed: {}", e);
                notifier.emit(Notification::CriticalError(format!(
                    "Compositor initialization failed: {e}"
                )));
                device.shutdown();
                self.state = PipelineState::DesktopOnly;
            }
        }
        self.state
    }

    /// Negotiated per-eye buffer size, when a headset is active.
    pub fn eye_size(&self) -> Option<(u32, u32)> {
        self.bridge.as_ref().map(CompositorBridge::eye_size)
    }

    pub fn submit_layout(&self) -> SubmitLayout {
        self.settings.submit_layout
    }

    /// Acquire this frame's poses. Blocks on the device's frame pacing.
    pub fn begin_frame(&mut self) {
        if self.state == PipelineState::DeviceReady {
            self.state = PipelineState::Rendering;
        }
        if self.state != PipelineState::Rendering {
            return;
        }
        if let Some(device) = self.device.as_deref_mut() {
            self.poses.update(device);
        }
    }

    pub fn device_mut(&mut self) -> Option<&mut (dyn HmdDevice + 'static)> {
        self.device.as_deref_mut()
    }

    /// Compositor to submit to this frame; `None` unless rendering to a headset.
    pub fn compositor_mut(&mut self) -> Option<&mut CompositorBridge> {
        if self.state != PipelineState::Rendering {
            return None;
        }
        self.bridge.as_mut()
    }

    /// Hand this frame's eye textures to the compositor, if rendering.
    pub fn submit(&mut self, textures: &EyeTextures<'_, wgpu::Texture>) {
        if let Some(bridge) = self.compositor_mut() {
            bridge.submit(textures);
        }
    }

    pub fn eye_view_projection(&self, eye: Eye) -> glam::Mat4 {
        self.poses.eye_view_projection(eye)
    }

    /// Track the window shape when the preview is the only output.
    pub fn set_desktop_aspect(&mut self, aspect: f32) {
        self.settings.desktop_aspect = aspect;
        if !self.is_stereo() {
            self.poses
                .set_desktop_aspect(aspect, self.settings.near_clip, self.settings.far_clip);
        }
    }

    /// Release the compositor and device handle. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.state == PipelineState::ShutDown {
            return;
        }
        self.bridge = None;
        if let Some(mut device) = self.device.take() {
            device.shutdown();
            info!("Headset released");
        }
        self.state = PipelineState::ShutDown;
    }
}

impl Drop for StereoSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::device::fake::{FakeDevice, FakeRuntime};
    use crate::device::NoHeadset;

    fn settings() -> SessionSettings {
        SessionSettings {
            near_clip: 0.1,
            far_clip: 100.0,
            submit_layout: SubmitLayout::SideBySide,
            show_mirror_window: false,
            desktop_aspect: 1.5,
        }
    }

    fn recording_notifier() -> (Notifier, Rc<RefCell<Vec<Notification>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut notifier = Notifier::new();
        let sink = seen.clone();
        notifier.subscribe(move |n| sink.borrow_mut().push(n.clone()));
        (notifier, seen)
    }

    #[test]
    fn successful_init_reaches_device_ready() {
        let device = FakeDevice::new();
        let runtime = FakeRuntime {
            device: Some(device.clone()),
        };
        let (mut notifier, seen) = recording_notifier();
        let mut session = StereoSession::new(settings());

        assert_eq!(session.initialize(&runtime, &mut notifier), PipelineState::DeviceReady);
        assert_eq!(session.eye_size(), Some((1024, 1152)));
        assert_eq!(
            seen.borrow()[0],
            Notification::DeviceIdentity("Panorama Viewer - fake FAKE-1".into())
        );
    }

    #[test]
    fn missing_headset_degrades_to_desktop_only() {
        let (mut notifier, seen) = recording_notifier();
        let mut session = StereoSession::new(settings());
        assert_eq!(session.initialize(&NoHeadset, &mut notifier), PipelineState::DesktopOnly);
        assert!(matches!(seen.borrow()[0], Notification::CriticalError(_)));
        assert!(session.eye_size().is_none());

        session.begin_frame();
        assert_eq!(session.state(), PipelineState::DesktopOnly);
        assert!(session.compositor_mut().is_none());
    }

    #[test]
    fn compositor_failure_releases_device() {
        let device = FakeDevice::new();
        device.state.borrow_mut().compositor_fails = true;
        let runtime = FakeRuntime {
            device: Some(device.clone()),
        };
        let (mut notifier, seen) = recording_notifier();
        let mut session = StereoSession::new(settings());

        assert_eq!(session.initialize(&runtime, &mut notifier), PipelineState::DesktopOnly);
        assert_eq!(device.state.borrow().shutdown_calls, 1);
        assert!(matches!(seen.borrow().last(), Some(Notification::CriticalError(_))));
        assert!(session.device_mut().is_none());
    }

    #[test]
    fn init_is_not_retried() {
        let (mut notifier, _) = recording_notifier();
        let mut session = StereoSession::new(settings());
        session.initialize(&NoHeadset, &mut notifier);
        let runtime = FakeRuntime {
            device: Some(FakeDevice::new()),
        };
        assert_eq!(session.initialize(&runtime, &mut notifier), PipelineState::DesktopOnly);
    }

    #[test]
    fn first_frame_starts_rendering_and_waits_for_poses() {
        let device = FakeDevice::new();
        let runtime = FakeRuntime {
            device: Some(device.clone()),
        };
        let (mut notifier, _) = recording_notifier();
        let mut session = StereoSession::new(settings());
        session.initialize(&runtime, &mut notifier);
        assert!(session.compositor_mut().is_none());

        session.begin_frame();
        session.begin_frame();
        assert_eq!(session.state(), PipelineState::Rendering);
        assert_eq!(device.state.borrow().wait_calls, 2);
        assert!(session.compositor_mut().is_some());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let device = FakeDevice::new();
        let runtime = FakeRuntime {
            device: Some(device.clone()),
        };
        let (mut notifier, _) = recording_notifier();
        let mut session = StereoSession::new(settings());
        session.initialize(&runtime, &mut notifier);

        session.shutdown();
        session.shutdown();
        drop(session);
        assert_eq!(device.state.borrow().shutdown_calls, 1);
    }

    #[test]
    fn shutdown_before_init_is_harmless() {
        let mut session = StereoSession::new(settings());
        session.shutdown();
        assert_eq!(session.state(), PipelineState::ShutDown);
        session.begin_frame();
        assert_eq!(session.state(), PipelineState::ShutDown);
    }

    #[test]
    fn desktop_aspect_only_moves_preview_projection() {
        let mut session = StereoSession::new(settings());
        let before = session.eye_view_projection(Eye::Right);
        session.set_desktop_aspect(0.5);
        assert_ne!(session.eye_view_projection(Eye::Right), before);
    }
}
