//! Notifications reported upward to the application shell.

use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// Headset identity, emitted once after a successful device init.
    DeviceIdentity(String),
    FramesPerSecond(f32),
    /// Human-readable status, e.g. after a panorama load.
    Status(String),
    /// Device or compositor initialization failure.
    CriticalError(String),
}

type Subscriber = Box<dyn FnMut(&Notification)>;

/// Observer list the shell subscribes to.
#[derive(Default)]
pub struct Notifier {
    subscribers: Vec<Subscriber>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&Notification) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn emit(&mut self, notification: Notification) {
        for subscriber in &mut self.subscribers {
            subscriber(&notification);
        }
    }
}

/// Counts frames and reports the rate once per elapsed second.
pub struct FrameCounter {
    frames: u32,
    window_start: Instant,
}

impl FrameCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    /// Record one frame; returns the rate when a full second has elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return None;
        }
        let rate = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(rate)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn every_subscriber_sees_every_notification() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut notifier = Notifier::new();
        for _ in 0..2 {
            let seen = seen.clone();
            notifier.subscribe(move |n| seen.borrow_mut().push(n.clone()));
        }
        notifier.emit(Notification::Status("loaded".into()));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn frame_rate_reported_once_per_second() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);
        for i in 1..90 {
            assert_eq!(counter.tick(start + Duration::from_millis(i * 10)), None);
        }
        let rate = counter.tick(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 90.0).abs() < 0.01);
        assert_eq!(counter.tick(start + Duration::from_millis(1010)), None);
    }
}
