//! Input router
//!
//! Polls controller buttons on every tracked-device slot and turns rising
//! edges of the forward/backward controls into panorama navigation. The
//! desktop keyboard maps onto the same actions.

use log::{info, trace};
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{Key, NamedKey};

use crate::device::{ButtonMask, HmdDevice, MAX_TRACKED_DEVICES};

/// Direction through the current directory's panoramas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
}

impl Navigation {
    pub fn delta(self) -> isize {
        match self {
            Navigation::Next => 1,
            Navigation::Previous => -1,
        }
    }
}

/// Buttons that advance to the next image.
pub const FORWARD_BUTTONS: ButtonMask = ButtonMask(ButtonMask::TRIGGER.0 | ButtonMask::DPAD_RIGHT.0);
/// Buttons that go back to the previous image.
pub const BACKWARD_BUTTONS: ButtonMask = ButtonMask(ButtonMask::GRIP.0 | ButtonMask::DPAD_LEFT.0);

/// One latch per slot per direction; a press fires once until released.
pub struct InputRouter {
    forward_held: [bool; MAX_TRACKED_DEVICES],
    backward_held: [bool; MAX_TRACKED_DEVICES],
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRouter {
    pub fn new() -> Self {
        Self {
            forward_held: [false; MAX_TRACKED_DEVICES],
            backward_held: [false; MAX_TRACKED_DEVICES],
        }
    }

    /// Drain device events and poll every controller slot once.
    pub fn poll(&mut self, device: &mut dyn HmdDevice) -> Vec<Navigation> {
        while let Some(event) = device.poll_event() {
            trace!("Device event: {:?}", event);
        }

        let mut actions = Vec::new();
        for slot in 0..MAX_TRACKED_DEVICES {
            let mask = device.controller_state(slot).unwrap_or(ButtonMask::NONE);
            actions.extend(self.update_slot(slot, mask));
        }
        actions
    }

    /// Feed one slot's button state; returns the actions whose buttons just went down.
    pub fn update_slot(&mut self, slot: usize, mask: ButtonMask) -> Vec<Navigation> {
        let mut actions = Vec::new();
        if rising_edge(&mut self.forward_held[slot], mask.intersects(FORWARD_BUTTONS)) {
            info!("Controller {}: next panorama", slot);
            actions.push(Navigation::Next);
        }
        if rising_edge(&mut self.backward_held[slot], mask.intersects(BACKWARD_BUTTONS)) {
            info!("Controller {}: previous panorama", slot);
            actions.push(Navigation::Previous);
        }
        actions
    }
}

fn rising_edge(latch: &mut bool, pressed: bool) -> bool {
    let fired = pressed && !*latch;
    *latch = pressed;
    fired
}

/// Arrow keys browse like the controller buttons.
pub fn keyboard_navigation(event: &KeyEvent) -> Option<Navigation> {
    if event.state != ElementState::Pressed || event.repeat {
        return None;
    }
    match &event.logical_key {
        Key::Named(NamedKey::ArrowRight) => Some(Navigation::Next),
        Key::Named(NamedKey::ArrowLeft) => Some(Navigation::Previous),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeDevice;
    use crate::device::DeviceEvent;

    #[test]
    fn held_button_fires_once_per_press() {
        let mut router = InputRouter::new();
        let sequence = [
            ButtonMask::TRIGGER,
            ButtonMask::TRIGGER,
            ButtonMask::NONE,
            ButtonMask::TRIGGER,
        ];
        let fired: usize = sequence
            .iter()
            .map(|&mask| router.update_slot(1, mask).len())
            .sum();
        assert_eq!(fired, 2);
    }

    #[test]
    fn directions_latch_independently() {
        let mut router = InputRouter::new();
        assert_eq!(router.update_slot(2, ButtonMask::TRIGGER), vec![Navigation::Next]);
        assert_eq!(
            router.update_slot(2, ButtonMask::TRIGGER | ButtonMask::GRIP),
            vec![Navigation::Previous]
        );
        assert!(router.update_slot(2, ButtonMask::GRIP).is_empty());
    }

    #[test]
    fn slots_latch_independently() {
        let mut router = InputRouter::new();
        assert_eq!(router.update_slot(1, ButtonMask::DPAD_LEFT).len(), 1);
        assert_eq!(router.update_slot(2, ButtonMask::DPAD_LEFT).len(), 1);
        assert!(router.update_slot(1, ButtonMask::DPAD_LEFT).is_empty());
    }

    #[test]
    fn unrelated_buttons_do_nothing() {
        let mut router = InputRouter::new();
        assert!(router.update_slot(1, ButtonMask::A | ButtonMask::SYSTEM).is_empty());
    }

    #[test]
    fn poll_drains_events_and_reads_every_slot() {
        let mut device = FakeDevice::new();
        device.state.borrow_mut().events.push_back(DeviceEvent::TrackedDeviceActivated(3));
        device.set_controller(3, Some(ButtonMask::DPAD_RIGHT));
        device.set_controller(4, Some(ButtonMask::GRIP));

        let mut router = InputRouter::new();
        assert_eq!(router.poll(&mut device), vec![Navigation::Next, Navigation::Previous]);
        assert!(device.state.borrow().events.is_empty());
        assert!(router.poll(&mut device).is_empty());

        device.set_controller(3, None);
        router.poll(&mut device);
        device.set_controller(3, Some(ButtonMask::DPAD_RIGHT));
        assert_eq!(router.poll(&mut device), vec![Navigation::Next]);
    }
}
