//! Compositor bridge
//!
//! Negotiates the eye-buffer size with the device and submits each frame's
//! eye textures. Whatever the submission shape, a frame produces exactly
//! one submit per eye, tagged with that eye and its UV bounds.

use log::{info, warn};
use serde::Deserialize;

use crate::device::{Compositor, Eye, HmdDevice, UvBounds};
use crate::error::CompositorError;

/// How the eye images are handed to the compositor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitLayout {
    /// One shared side-by-side texture, each eye submitted with its half.
    #[default]
    SideBySide,
    /// A separate resolved texture per eye, each submitted whole.
    PerEye,
}

/// Textures ready for submission this frame.
pub enum EyeTextures<'a, T: ?Sized> {
    SideBySide(&'a T),
    PerEye { left: &'a T, right: &'a T },
}

impl<'a, T: ?Sized> EyeTextures<'a, T> {
    /// Texture and UV bounds to submit for `eye`.
    pub fn for_eye(&self, eye: Eye) -> (&'a T, UvBounds) {
        match *self {
            EyeTextures::SideBySide(texture) => (texture, UvBounds::for_eye(eye)),
            EyeTextures::PerEye { left, right } => match eye {
                Eye::Left => (left, UvBounds::FULL),
                Eye::Right => (right, UvBounds::FULL),
            },
        }
    }
}

/// Submit both eyes; stops at the first rejected submit.
pub fn submit_frame<T: ?Sized>(
    compositor: &mut dyn Compositor<T>,
    textures: &EyeTextures<'_, T>,
) -> Result<(), CompositorError> {
    for eye in Eye::BOTH {
        let (texture, bounds) = textures.for_eye(eye);
        compositor.submit(eye, texture, bounds)?;
    }
    Ok(())
}

/// Owns the compositor handle and the negotiated eye-buffer size.
pub struct CompositorBridge {
    compositor: Box<dyn Compositor>,
    eye_size: (u32, u32),
    layout: SubmitLayout,
}

impl CompositorBridge {
    /// Read the recommended eye size and obtain the compositor.
    pub fn negotiate(device: &mut dyn HmdDevice, layout: SubmitLayout) -> Result<Self, CompositorError> {
        let eye_size = recommended_eye_size(device);
        info!("Recommended eye buffer size: {}x{}", eye_size.0, eye_size.1);
        let compositor = device.compositor()?;
        Ok(Self {
            compositor,
            eye_size,
            layout,
        })
    }

    pub fn eye_size(&self) -> (u32, u32) {
        self.eye_size
    }

    pub fn layout(&self) -> SubmitLayout {
        self.layout
    }

    pub fn show_mirror_window(&mut self) {
        self.compositor.show_mirror_window();
    }

    /// Submit this frame's eye textures; failures are logged, never fatal.
    pub fn submit(&mut self, textures: &EyeTextures<'_, wgpu::Texture>) {
        if let Err(e) = submit_frame(self.compositor.as_mut(), textures) {
            warn!("Frame submission failed: {}", e);
        }
    }
}

/// Recommended size clamped to at least one pixel per side.
pub fn recommended_eye_size(device: &dyn HmdDevice) -> (u32, u32) {
    let (width, height) = device.recommended_render_target_size();
    (width.max(1), height.max(1))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::device::fake::{FakeDevice, RecordingCompositor};

    fn recorder() -> (RecordingCompositor, Rc<RefCell<Vec<(Eye, UvBounds)>>>) {
        let submits = Rc::new(RefCell::new(Vec::new()));
        (
            RecordingCompositor {
                submits: submits.clone(),
            },
            submits,
        )
    }

    #[test]
    fn side_by_side_submits_each_half_once() {
        let (mut compositor, submits) = recorder();
        let shared = 7u32;
        submit_frame::<u32>(&mut compositor, &EyeTextures::SideBySide(&shared)).unwrap();
        assert_eq!(
            *submits.borrow(),
            vec![
                (Eye::Left, UvBounds::for_eye(Eye::Left)),
                (Eye::Right, UvBounds::for_eye(Eye::Right)),
            ]
        );
    }

    #[test]
    fn per_eye_submits_full_textures() {
        let (mut compositor, submits) = recorder();
        let (left, right) = (1u32, 2u32);
        submit_frame::<u32>(
            &mut compositor,
            &EyeTextures::PerEye {
                left: &left,
                right: &right,
            },
        )
        .unwrap();
        let submits = submits.borrow();
        assert_eq!(submits.len(), 2);
        assert!(submits.iter().all(|(_, bounds)| *bounds == UvBounds::FULL));
        assert_eq!(submits[0].0, Eye::Left);
        assert_eq!(submits[1].0, Eye::Right);
    }

    struct RejectingCompositor {
        attempts: Vec<Eye>,
    }

    impl Compositor<u32> for RejectingCompositor {
        fn submit(&mut self, eye: Eye, _texture: &u32, _bounds: UvBounds) -> Result<(), CompositorError> {
            self.attempts.push(eye);
            Err(CompositorError::Submit {
                eye,
                reason: "busy".into(),
            })
        }

        fn show_mirror_window(&mut self) {}
    }

    #[test]
    fn rejected_submit_stops_the_frame() {
        let mut compositor = RejectingCompositor { attempts: Vec::new() };
        let err = submit_frame(&mut compositor, &EyeTextures::SideBySide(&0u32)).unwrap_err();
        assert!(matches!(err, CompositorError::Submit { eye: Eye::Left, .. }));
        assert_eq!(compositor.attempts, vec![Eye::Left]);
    }

    #[test]
    fn per_eye_lookup_returns_matching_texture() {
        let (left, right) = (1u32, 2u32);
        let textures = EyeTextures::PerEye {
            left: &left,
            right: &right,
        };
        assert_eq!(*textures.for_eye(Eye::Right).0, 2);
    }

    #[test]
    fn negotiation_reads_recommended_size() {
        let mut device = FakeDevice::new();
        device.state.borrow_mut().size = (0, 900);
        let bridge = CompositorBridge::negotiate(&mut device, SubmitLayout::SideBySide).unwrap();
        assert_eq!(bridge.eye_size(), (1, 900));
    }

    #[test]
    fn negotiation_fails_without_compositor() {
        let mut device = FakeDevice::new();
        device.state.borrow_mut().compositor_fails = true;
        assert!(CompositorBridge::negotiate(&mut device, SubmitLayout::PerEye).is_err());
    }
}
