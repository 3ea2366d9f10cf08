//! Inertial cursor coasting.
//!
//! [`Coaster`] watches touch contacts and pointer motion from the dispatch
//! queue. While a finger is touching it remembers the last two cursor
//! positions; when the last finger lifts it derives a release velocity from
//! them and glides that velocity to rest with exponential decay, one
//! [`step`](Coaster::step) per tick.
//!
//! The coaster only computes motion. Moving the cursor with the returned
//! [`CoastStep`]s is left to the caller.
//!
//! ```
//! use touchwatch::{Coaster, CoastOptions, ScreenBounds};
//!
//! let mut coaster = Coaster::new(CoastOptions::default())
//!     .with_bounds(ScreenBounds::from_display(0.0, 0.0, 1440.0, 900.0));
//!
//! coaster.on_touch(1, 100.0, 100.0, 0.000);
//! coaster.on_touch(1, 110.0, 100.0, 0.016);
//! assert!(coaster.on_touch(0, 110.0, 100.0, 0.032));
//!
//! let step = coaster.step(0.016).unwrap();
//! assert!(step.dx > 0.0);
//! ```

use crate::contact::TouchState;
use crate::device::DeviceId;
use crate::event::Event;
use crate::tap::{TapEvent, TapEventKind};
use log::{debug, trace};
use std::collections::BTreeSet;
use std::time::{Duration, UNIX_EPOCH};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Velocity decay rate, per second.
pub const DECAY_RATE: f64 = 5.0;

/// Speed below which a coast stops, in points per second.
pub const STOP_THRESHOLD: f64 = 10.0;

/// Sample spacing below which no release velocity is derived.
pub const MIN_TIME_DELTA: f64 = 1e-9;

/// Suggested interval between [`Coaster::step`] calls (about 60 Hz).
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Coasting policy knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CoastOptions {
    pub decay_rate: f64,
    pub stop_threshold: f64,
}

impl Default for CoastOptions {
    fn default() -> Self {
        Self {
            decay_rate: DECAY_RATE,
            stop_threshold: STOP_THRESHOLD,
        }
    }
}

/// Inclusive cursor limits, in screen points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScreenBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ScreenBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounds of a display rectangle. The far edges lie one point outside the
    /// last addressable pixel, so they are pulled in by one.
    pub fn from_display(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width - 1.0, y + height - 1.0)
    }
}

/// Cursor motion for one tick of a coast.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoastStep {
    /// Cursor position after this tick.
    pub x: f64,
    pub y: f64,
    /// Exact movement this tick, after clamping.
    pub dx: f64,
    pub dy: f64,
    /// Whole-point movement, with fractions carried into later ticks.
    pub pixel_dx: i32,
    pub pixel_dy: i32,
    /// The coast came to rest on this tick.
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct CursorSample {
    x: f64,
    y: f64,
    timestamp: f64,
}

/// Release-velocity estimator and decaying glide.
#[derive(Debug, Clone)]
pub struct Coaster {
    options: CoastOptions,
    bounds: Option<ScreenBounds>,
    history: [CursorSample; 2],
    history_len: usize,
    touched: bool,
    touching: BTreeSet<(DeviceId, i32)>,
    last_cursor: Option<CursorSample>,
    vx: f64,
    vy: f64,
    x: f64,
    y: f64,
    accum_x: f64,
    accum_y: f64,
}

impl Default for Coaster {
    fn default() -> Self {
        Self::new(CoastOptions::default())
    }
}

impl Coaster {
    pub fn new(options: CoastOptions) -> Self {
        Self {
            options,
            bounds: None,
            history: [CursorSample::default(); 2],
            history_len: 0,
            touched: false,
            touching: BTreeSet::new(),
            last_cursor: None,
            vx: 0.0,
            vy: 0.0,
            x: 0.0,
            y: 0.0,
            accum_x: 0.0,
            accum_y: 0.0,
        }
    }

    /// Stop coasts at these edges. A clamped axis loses its velocity.
    pub fn with_bounds(mut self, bounds: ScreenBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn set_bounds(&mut self, bounds: Option<ScreenBounds>) {
        self.bounds = bounds;
    }

    pub fn is_touched(&self) -> bool {
        self.touched
    }

    pub fn is_coasting(&self) -> bool {
        self.vx != 0.0 || self.vy != 0.0
    }

    /// Current glide velocity, in points per second.
    pub fn velocity(&self) -> (f64, f64) {
        (self.vx, self.vy)
    }

    /// Report the number of touching fingers and the cursor position.
    ///
    /// Touching frames record the cursor and cancel any coast. The first
    /// frame with no touching finger derives the release velocity from the
    /// last two recorded positions. Returns `true` when that starts a coast.
    pub fn on_touch(&mut self, touching: usize, x: f64, y: f64, timestamp: f64) -> bool {
        let was_touched = self.touched;
        self.touched = touching > 0;

        if self.touched {
            if !was_touched {
                self.accum_x = 0.0;
                self.accum_y = 0.0;
            }
            self.record(CursorSample { x, y, timestamp });
            self.vx = 0.0;
            self.vy = 0.0;
            return false;
        }
        if !was_touched {
            return false;
        }

        (self.vx, self.vy) = self.release_velocity();
        self.history_len = 0;
        self.x = x;
        self.y = y;
        self.accum_x = 0.0;
        self.accum_y = 0.0;

        if self.is_coasting() {
            debug!(
                "coast from ({:.1}, {:.1}) at ({:.1}, {:.1}) pt/s",
                x, y, self.vx, self.vy
            );
        }
        self.is_coasting()
    }

    /// Feed one event from the dispatch queue.
    ///
    /// Touch events maintain the set of fingers in `Touching`; pointer
    /// motion from an event tap supplies cursor positions. Returns `true`
    /// when the event starts a coast.
    pub fn on_event(&mut self, event: &Event) -> bool {
        match event {
            Event::TouchBegin(sample) | Event::TouchUpdate(sample) => {
                let key = (sample.device, sample.contact.finger_id);
                if sample.contact.state == TouchState::Touching {
                    self.touching.insert(key);
                } else {
                    self.touching.remove(&key);
                }
                self.on_touch_changed()
            }
            Event::TouchEnd(sample) => {
                self.touching
                    .remove(&(sample.device, sample.contact.finger_id));
                self.on_touch_changed()
            }
            Event::DeviceDeparted(info) => {
                self.touching.retain(|(device, _)| *device != info.id);
                self.on_touch_changed()
            }
            Event::Tap { event, .. } if is_pointer_motion(event) => {
                let sample = cursor_sample(event);
                self.last_cursor = Some(sample);
                if !self.touching.is_empty() {
                    self.on_touch(self.touching.len(), sample.x, sample.y, sample.timestamp);
                }
                false
            }
            _ => false,
        }
    }

    /// Advance a coast by `dt` seconds.
    ///
    /// Returns `None` while no coast is running. The step that brings the
    /// coast to rest has `finished` set.
    pub fn step(&mut self, dt: f64) -> Option<CoastStep> {
        if !self.is_coasting() {
            return None;
        }

        let (prev_x, prev_y) = (self.x, self.y);
        self.x += self.vx * dt;
        self.y += self.vy * dt;
        self.clamp_to_bounds();

        let (dx, dy) = (self.x - prev_x, self.y - prev_y);
        let (pixel_dx, pixel_dy) = self.extract_integer_delta(dx, dy);
        self.apply_decay(dt);

        let finished = !self.is_coasting();
        if finished {
            debug!("coast stopped at ({:.1}, {:.1})", self.x, self.y);
            self.accum_x = 0.0;
            self.accum_y = 0.0;
        }
        trace!("coast step ({:.2}, {:.2})", dx, dy);

        Some(CoastStep {
            x: self.x,
            y: self.y,
            dx,
            dy,
            pixel_dx,
            pixel_dy,
            finished,
        })
    }

    /// Cancel a running coast.
    pub fn stop(&mut self) {
        self.vx = 0.0;
        self.vy = 0.0;
        self.accum_x = 0.0;
        self.accum_y = 0.0;
    }

    // Finger count changes alone do not move the cursor, so only the
    // touch and release edges are reported.
    fn on_touch_changed(&mut self) -> bool {
        let touching = self.touching.len();
        if touching > 0 && self.touched {
            return false;
        }
        match self.last_cursor {
            Some(cursor) => self.on_touch(touching, cursor.x, cursor.y, cursor.timestamp),
            None => {
                self.touched = touching > 0;
                false
            }
        }
    }

    // Keeps the two most recent samples.
    fn record(&mut self, sample: CursorSample) {
        if self.history_len < 2 {
            self.history[self.history_len] = sample;
            self.history_len += 1;
        } else {
            self.history[0] = self.history[1];
            self.history[1] = sample;
        }
    }

    fn release_velocity(&self) -> (f64, f64) {
        if self.history_len < 2 {
            return (0.0, 0.0);
        }
        let [prev, curr] = self.history;
        let dt = curr.timestamp - prev.timestamp;
        if dt < MIN_TIME_DELTA {
            return (0.0, 0.0);
        }
        ((curr.x - prev.x) / dt, (curr.y - prev.y) / dt)
    }

    fn clamp_to_bounds(&mut self) {
        let Some(b) = self.bounds else {
            return;
        };
        if self.x < b.min_x {
            self.x = b.min_x;
            self.vx = 0.0;
        } else if self.x > b.max_x {
            self.x = b.max_x;
            self.vx = 0.0;
        }
        if self.y < b.min_y {
            self.y = b.min_y;
            self.vy = 0.0;
        } else if self.y > b.max_y {
            self.y = b.max_y;
            self.vy = 0.0;
        }
    }

    fn extract_integer_delta(&mut self, dx: f64, dy: f64) -> (i32, i32) {
        self.accum_x += dx;
        self.accum_y += dy;
        let (ix, iy) = (self.accum_x.trunc(), self.accum_y.trunc());
        self.accum_x -= ix;
        self.accum_y -= iy;
        (ix as i32, iy as i32)
    }

    fn apply_decay(&mut self, dt: f64) {
        let factor = (-self.options.decay_rate * dt).exp();
        self.vx *= factor;
        self.vy *= factor;
        if self.vx.hypot(self.vy) < self.options.stop_threshold {
            self.vx = 0.0;
            self.vy = 0.0;
        }
    }
}

fn is_pointer_motion(event: &TapEvent) -> bool {
    matches!(
        event.kind,
        TapEventKind::MouseMoved
            | TapEventKind::LeftMouseDragged
            | TapEventKind::RightMouseDragged
            | TapEventKind::OtherMouseDragged
    )
}

fn cursor_sample(event: &TapEvent) -> CursorSample {
    let timestamp = event
        .time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    CursorSample {
        x: event.x,
        y: event.y,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::tap::TapOutcome;
    use crate::testing::contact;
    use crate::tracker::TouchSample;
    use std::time::SystemTime;

    fn released(vx: f64) -> Coaster {
        let mut c = Coaster::default();
        c.on_touch(1, 0.0, 0.0, 1.0);
        c.on_touch(1, vx, 0.0, 2.0);
        assert!(c.on_touch(0, vx, 0.0, 2.1));
        c
    }

    fn touch(device: u64, finger: i32, state: TouchState) -> TouchSample {
        TouchSample {
            device: DeviceId::new(device),
            frame: 1,
            contact: contact(finger, state),
        }
    }

    fn moved(x: f64, y: f64, secs: f64) -> Event {
        let mut event = TapEvent::new(TapEventKind::MouseMoved, x, y);
        event.time = UNIX_EPOCH + Duration::from_secs_f64(secs);
        Event::Tap {
            event,
            outcome: TapOutcome::PassedThrough,
        }
    }

    #[test]
    fn test_release_velocity_from_last_two_samples() {
        let mut c = Coaster::default();
        c.on_touch(1, 0.0, 0.0, 0.0);
        c.on_touch(2, 50.0, 0.0, 0.5);
        c.on_touch(1, 60.0, 20.0, 1.0);
        assert!(c.on_touch(0, 60.0, 20.0, 1.1));

        let (vx, vy) = c.velocity();
        assert!((vx - 20.0).abs() < 1e-9);
        assert!((vy - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_or_zero_dt_gives_no_coast() {
        let mut c = Coaster::default();
        c.on_touch(1, 0.0, 0.0, 0.0);
        assert!(!c.on_touch(0, 0.0, 0.0, 0.1));

        c.on_touch(1, 0.0, 0.0, 1.0);
        c.on_touch(1, 100.0, 0.0, 1.0);
        assert!(!c.on_touch(0, 100.0, 0.0, 1.0));
        assert!(c.step(0.016).is_none());
    }

    #[test]
    fn test_touch_cancels_coast() {
        let mut c = released(500.0);
        assert!(c.is_coasting());
        c.on_touch(1, 10.0, 10.0, 3.0);
        assert!(!c.is_coasting());
        assert!(c.step(0.016).is_none());
    }

    #[test]
    fn test_velocity_decays_exponentially() {
        let mut c = released(1000.0);
        let step = c.step(0.1).unwrap();
        assert!((step.dx - 100.0).abs() < 1e-9);
        let (vx, _) = c.velocity();
        assert!((vx - 1000.0 * (-0.5f64).exp()).abs() < 1e-9);
        assert!(!step.finished);
    }

    #[test]
    fn test_coast_stops_below_threshold() {
        let mut c = released(1000.0);
        let mut steps = 0;
        loop {
            let step = c.step(0.016).unwrap();
            steps += 1;
            if step.finished {
                break;
            }
            assert!(steps < 1000);
        }
        assert!(!c.is_coasting());
        assert_eq!(c.velocity(), (0.0, 0.0));
        assert!(c.step(0.016).is_none());
    }

    #[test]
    fn test_fractional_motion_accumulates() {
        let mut c = Coaster::new(CoastOptions {
            decay_rate: 0.0,
            stop_threshold: 0.0,
        });
        c.on_touch(1, 0.0, 0.0, 0.0);
        c.on_touch(1, 0.25, -0.25, 1.0);
        c.on_touch(0, 0.0, 0.0, 1.0);

        let pixels: Vec<(i32, i32)> = (0..5)
            .map(|_| {
                let step = c.step(1.0).unwrap();
                (step.pixel_dx, step.pixel_dy)
            })
            .collect();
        assert_eq!(pixels, vec![(0, 0), (0, 0), (0, 0), (1, -1), (0, 0)]);
    }

    #[test]
    fn test_clamped_axis_loses_velocity() {
        let mut c =
            Coaster::default().with_bounds(ScreenBounds::from_display(0.0, 0.0, 100.0, 50.0));
        c.on_touch(1, 90.0, 10.0, 0.0);
        c.on_touch(1, 95.0, 20.0, 0.01);
        assert!(c.on_touch(0, 95.0, 20.0, 0.02));

        let step = c.step(0.1).unwrap();
        assert_eq!(step.x, 99.0);
        assert_eq!(step.y, 49.0);
        assert!((step.dx - 4.0).abs() < 1e-9);
        assert!(step.finished);
        assert!(!c.is_coasting());
    }

    #[test]
    fn test_coasts_from_queue_events() {
        let mut c = Coaster::default();
        let a = touch(1, 1, TouchState::Touching);
        let b = touch(1, 2, TouchState::Touching);

        assert!(!c.on_event(&moved(100.0, 100.0, 10.0)));
        assert!(!c.on_event(&Event::TouchBegin(a)));
        assert!(!c.on_event(&Event::TouchBegin(b)));
        assert!(!c.on_event(&moved(110.0, 100.0, 10.1)));
        assert!(!c.on_event(&moved(130.0, 100.0, 10.2)));
        assert!(!c.on_event(&Event::TouchEnd(a)));
        assert!(c.is_touched());

        assert!(c.on_event(&Event::TouchEnd(b)));
        let (vx, vy) = c.velocity();
        assert!((vx - 200.0).abs() < 1e-3);
        assert_eq!(vy, 0.0);
    }

    #[test]
    fn test_hover_and_departed_device_do_not_hold_touch() {
        let mut c = Coaster::default();
        c.on_event(&moved(0.0, 0.0, 1.0));
        c.on_event(&Event::TouchBegin(touch(1, 1, TouchState::StartInRange)));
        assert!(!c.is_touched());

        c.on_event(&Event::TouchUpdate(touch(2, 4, TouchState::Touching)));
        assert!(c.is_touched());
        c.on_event(&moved(30.0, 0.0, 1.1));
        let departed = Event::DeviceDeparted(DeviceInfo {
            id: DeviceId::new(2),
        });
        assert!(c.on_event(&departed));
        assert!(!c.is_touched());
    }

    #[test]
    fn test_cursor_sample_uses_event_time() {
        let mut event = TapEvent::new(TapEventKind::LeftMouseDragged, 1.0, 2.0);
        event.time = SystemTime::UNIX_EPOCH + Duration::from_millis(1500);
        assert!(is_pointer_motion(&event));
        let sample = cursor_sample(&event);
        assert_eq!(sample.timestamp, 1.5);
    }
}
