//! Per-device touch state tracking.
//!
//! [`TouchTracker`] follows every finger of one device across frames, keyed
//! by finger id, and turns the framework's eight-state lifecycle into three
//! consumer events: begin, update and end.

use crate::contact::{Contact, Frame, TouchState};
use crate::device::DeviceId;
use log::{debug, trace, warn};
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One contact attributed to its device and frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TouchSample {
    pub device: DeviceId,
    pub frame: i32,
    pub contact: Contact,
}

/// Touch lifecycle transition emitted by the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    /// A finger came into range or touched down.
    Begin(TouchSample),
    /// A finger in contact moved or changed state.
    Update(TouchSample),
    /// A finger left, either reported or by disappearing from the frame.
    End(TouchSample),
}

impl TouchEvent {
    pub fn sample(&self) -> &TouchSample {
        match self {
            TouchEvent::Begin(s) | TouchEvent::Update(s) | TouchEvent::End(s) => s,
        }
    }

    pub fn finger_id(&self) -> i32 {
        self.sample().contact.finger_id
    }
}

/// Tracker policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerOptions {
    /// Drop an update whose geometry is bit-identical to the last emitted
    /// contact when the state did not change either.
    pub suppress_unchanged: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            suppress_unchanged: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FingerMachine {
    state: TouchState,
    last_emitted: Contact,
    last_seen: Contact,
    last_frame: i32,
}

/// State machines for every live finger on one device.
#[derive(Debug)]
pub struct TouchTracker {
    device: DeviceId,
    options: TrackerOptions,
    last_frame: Option<i32>,
    fingers: BTreeMap<i32, FingerMachine>,
}

impl TouchTracker {
    pub fn new(device: DeviceId, options: TrackerOptions) -> Self {
        Self {
            device,
            options,
            last_frame: None,
            fingers: BTreeMap::new(),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Number of fingers with a live lifecycle.
    pub fn active_fingers(&self) -> usize {
        self.fingers.len()
    }

    /// Number of live fingers whose last reported state was `Touching`.
    pub fn touching_count(&self) -> usize {
        self.fingers
            .values()
            .filter(|m| m.state == TouchState::Touching)
            .count()
    }

    /// Consume one frame and return the lifecycle events it implies.
    ///
    /// Frames must arrive in increasing frame-number order. A frame that does
    /// not is logged and dropped without touching any finger state.
    pub fn on_frame(&mut self, frame: &Frame) -> Vec<TouchEvent> {
        if let Some(last) = self.last_frame
            && frame.number <= last
        {
            warn!(
                "device {}: frame {} arrived after frame {}, dropping",
                self.device, frame.number, last
            );
            return Vec::new();
        }
        self.last_frame = Some(frame.number);

        let mut events = Vec::new();
        let mut seen = BTreeSet::new();

        for contact in &frame.contacts {
            if !seen.insert(contact.finger_id) {
                warn!(
                    "device {}: finger {} reported twice in frame {}, ignoring duplicate",
                    self.device, contact.finger_id, frame.number
                );
                continue;
            }
            if let Some(event) = self.advance(contact, frame.number) {
                events.push(event);
            }
        }

        let absent: Vec<i32> = self
            .fingers
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in absent {
            if let Some(machine) = self.fingers.remove(&id) {
                debug!(
                    "device {}: finger {} vanished in frame {}, ending touch",
                    self.device, id, frame.number
                );
                events.push(TouchEvent::End(self.sample(machine.last_seen, frame.number)));
            }
        }

        trace!(
            "device {}: frame {} -> {} events, {} live fingers",
            self.device,
            frame.number,
            events.len(),
            self.fingers.len()
        );
        events
    }

    /// Forget every live finger, returning an end event for each.
    pub fn reset(&mut self) -> Vec<TouchEvent> {
        let fingers = std::mem::take(&mut self.fingers);
        self.last_frame = None;
        fingers
            .into_values()
            .map(|m| TouchEvent::End(self.sample(m.last_seen, m.last_frame)))
            .collect()
    }

    fn advance(&mut self, contact: &Contact, frame: i32) -> Option<TouchEvent> {
        let id = contact.finger_id;
        let Some(machine) = self.fingers.get_mut(&id) else {
            return self.begin(contact, frame);
        };

        if contact.state.ends_lifecycle() {
            self.fingers.remove(&id);
            return Some(TouchEvent::End(self.sample(*contact, frame)));
        }

        if !machine.state.can_transition_to(contact.state) {
            warn!(
                "device {}: finger {} jumped from {:?} to {:?} in frame {}, ignoring",
                self.device, id, machine.state, contact.state, frame
            );
            return None;
        }

        machine.state = contact.state;
        machine.last_seen = *contact;
        machine.last_frame = frame;

        if !contact.state.reports_updates() {
            return None;
        }

        let unchanged = machine.last_emitted.state == contact.state
            && machine.last_emitted.same_geometry(contact);
        if unchanged && self.options.suppress_unchanged {
            return None;
        }

        machine.last_emitted = *contact;
        Some(TouchEvent::Update(self.sample(*contact, frame)))
    }

    fn begin(&mut self, contact: &Contact, frame: i32) -> Option<TouchEvent> {
        if contact.state.ends_lifecycle() {
            trace!(
                "device {}: untracked finger {} reported {:?}",
                self.device, contact.finger_id, contact.state
            );
            return None;
        }
        if !contact.state.is_entry() {
            debug!(
                "device {}: finger {} first seen mid-touch in {:?}",
                self.device, contact.finger_id, contact.state
            );
        }

        self.fingers.insert(
            contact.finger_id,
            FingerMachine {
                state: contact.state,
                last_emitted: *contact,
                last_seen: *contact,
                last_frame: frame,
            },
        );
        Some(TouchEvent::Begin(self.sample(*contact, frame)))
    }

    fn sample(&self, contact: Contact, frame: i32) -> TouchSample {
        TouchSample {
            device: self.device,
            frame,
            contact,
        }
    }
}
