//! Desktop gamepads as tracked controllers
//!
//! Each connected gamepad occupies a tracked-device slot after the HMD and
//! reports its buttons as a [`ButtonMask`], so the simulated headset can be
//! driven with an ordinary controller.

use gilrs::{Button, Event, EventType, Gilrs};
use log::{debug, info};

use crate::device::{ButtonMask, DeviceEvent, HMD_DEVICE_INDEX, MAX_TRACKED_DEVICES};

/// Controller button bit for a gamepad button.
pub fn button_bit(button: Button) -> ButtonMask {
    match button {
        Button::RightTrigger | Button::RightTrigger2 => ButtonMask::TRIGGER,
        Button::LeftTrigger | Button::LeftTrigger2 => ButtonMask::GRIP,
        Button::DPadLeft => ButtonMask::DPAD_LEFT,
        Button::DPadRight => ButtonMask::DPAD_RIGHT,
        Button::DPadUp => ButtonMask::DPAD_UP,
        Button::DPadDown => ButtonMask::DPAD_DOWN,
        Button::South => ButtonMask::A,
        Button::Start => ButtonMask::APPLICATION_MENU,
        Button::Mode => ButtonMask::SYSTEM,
        _ => ButtonMask::NONE,
    }
}

/// Tracked-device slot for the n-th gamepad, if one is left.
pub fn slot_for(gamepad_index: usize) -> Option<usize> {
    let slot = HMD_DEVICE_INDEX + 1 + gamepad_index;
    (slot < MAX_TRACKED_DEVICES).then_some(slot)
}

/// Buttons of one connected gamepad.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct PadState {
    held: ButtonMask,
    /// Pressed during the last drain, even if already released again.
    tapped: ButtonMask,
}

impl PadState {
    fn press(&mut self, button: Button) {
        let bit = button_bit(button);
        self.held |= bit;
        self.tapped |= bit;
    }

    fn release(&mut self, button: Button) {
        self.held.0 &= !button_bit(button).0;
    }

    /// Held buttons plus any tapped since the last drain, so a press and
    /// release within one frame still reads as pressed for that frame.
    fn reported(&self) -> ButtonMask {
        self.held | self.tapped
    }
}

pub struct GamepadControllers {
    gilrs: Option<Gilrs>,
    pads: [Option<PadState>; MAX_TRACKED_DEVICES],
}

impl GamepadControllers {
    pub fn new() -> Self {
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Gamepad system initialized");
                Some(g)
            }
            Err(e) => {
                info!("No gamepad support: {:?}", e);
                None
            }
        };
        let mut controllers = Self {
            gilrs,
            ..Self::disconnected()
        };
        if let Some(gilrs) = &controllers.gilrs {
            let connected: Vec<usize> = gilrs.gamepads().map(|(id, _)| usize::from(id)).collect();
            for index in connected {
                if let Some(slot) = slot_for(index) {
                    controllers.pads[slot] = Some(PadState::default());
                }
            }
        }
        controllers
    }

    /// No gamepad backend; every slot reads as empty.
    pub fn disconnected() -> Self {
        Self {
            gilrs: None,
            pads: [None; MAX_TRACKED_DEVICES],
        }
    }

    /// Drain gamepad events, returning connection changes as device events.
    pub fn pump(&mut self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        let Some(gilrs) = &mut self.gilrs else {
            return events;
        };
        for pad in self.pads.iter_mut().flatten() {
            pad.tapped = ButtonMask::NONE;
        }
        while let Some(Event { id, event, .. }) = gilrs.next_event() {
            let Some(slot) = slot_for(usize::from(id)) else {
                continue;
            };
            if let Some(device_event) = apply_event(&mut self.pads[slot], slot, event) {
                events.push(device_event);
            }
        }
        events
    }

    /// Button state of the controller in `slot`, `None` if nothing is there.
    pub fn state(&self, slot: usize) -> Option<ButtonMask> {
        self.pads.get(slot).copied().flatten().map(|pad| pad.reported())
    }
}

impl Default for GamepadControllers {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_event(pad: &mut Option<PadState>, slot: usize, event: EventType) -> Option<DeviceEvent> {
    match event {
        EventType::Connected => {
            info!("Gamepad connected in slot {}", slot);
            *pad = Some(PadState::default());
            Some(DeviceEvent::TrackedDeviceActivated(slot))
        }
        EventType::Disconnected => {
            info!("Gamepad in slot {} disconnected", slot);
            *pad = None;
            Some(DeviceEvent::TrackedDeviceDeactivated(slot))
        }
        EventType::ButtonPressed(button, _) => {
            debug!("Slot {}: {:?} pressed", slot, button);
            pad.get_or_insert_with(PadState::default).press(button);
            None
        }
        EventType::ButtonReleased(button, _) => {
            if let Some(pad) = pad {
                pad.release(button);
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_and_bumpers_map_to_navigation_bits() {
        assert_eq!(button_bit(Button::RightTrigger2), ButtonMask::TRIGGER);
        assert_eq!(button_bit(Button::LeftTrigger), ButtonMask::GRIP);
        assert_eq!(button_bit(Button::DPadRight), ButtonMask::DPAD_RIGHT);
        assert_eq!(button_bit(Button::North), ButtonMask::NONE);
    }

    #[test]
    fn slots_start_after_the_headset() {
        assert_eq!(slot_for(0), Some(1));
        assert_eq!(slot_for(14), Some(15));
        assert_eq!(slot_for(15), None);
    }

    #[test]
    fn press_and_release_update_the_mask() {
        let mut pad = None;
        assert_eq!(
            apply_event(&mut pad, 1, EventType::Connected),
            Some(DeviceEvent::TrackedDeviceActivated(1))
        );
        let state = pad.as_mut().unwrap();
        state.press(Button::RightTrigger2);
        state.press(Button::DPadLeft);
        assert_eq!(state.held, ButtonMask::TRIGGER | ButtonMask::DPAD_LEFT);

        state.release(Button::RightTrigger2);
        assert_eq!(state.held, ButtonMask::DPAD_LEFT);

        assert_eq!(
            apply_event(&mut pad, 1, EventType::Disconnected),
            Some(DeviceEvent::TrackedDeviceDeactivated(1))
        );
        assert_eq!(pad, None);
    }

    #[test]
    fn quick_tap_reads_as_pressed_until_the_next_drain() {
        let mut pad = PadState::default();
        pad.press(Button::RightTrigger2);
        pad.release(Button::RightTrigger2);
        assert_eq!(pad.held, ButtonMask::NONE);
        assert_eq!(pad.reported(), ButtonMask::TRIGGER);

        pad.tapped = ButtonMask::NONE;
        assert_eq!(pad.reported(), ButtonMask::NONE);
    }

    #[test]
    fn tapped_buttons_show_in_controller_state() {
        let mut controllers = GamepadControllers::disconnected();
        let mut pad = PadState::default();
        pad.press(Button::DPadRight);
        pad.release(Button::DPadRight);
        controllers.pads[1] = Some(pad);
        assert_eq!(controllers.state(1), Some(ButtonMask::DPAD_RIGHT));
        assert_eq!(controllers.state(2), None);
    }
}
