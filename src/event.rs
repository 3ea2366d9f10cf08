//! Consumer-facing events.

use crate::device::{DeviceId, DeviceInfo};
use crate::tap::{TapDisableReason, TapEvent, TapOutcome};
use crate::tracker::{TouchEvent, TouchSample};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The kind of an [`Event`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventType {
    TouchBegin,
    TouchUpdate,
    TouchEnd,
    DeviceArrived,
    DeviceDeparted,
    Tap,
    TapReenabled,
}

/// Everything the monitor hands to a consumer through the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Event {
    /// A finger's lifecycle started.
    TouchBegin(TouchSample),
    /// A finger in contact moved or changed state.
    TouchUpdate(TouchSample),
    /// A finger's lifecycle ended.
    TouchEnd(TouchSample),
    /// A touch device was attached.
    DeviceArrived(DeviceInfo),
    /// A touch device was detached.
    DeviceDeparted(DeviceInfo),
    /// A pointer or keyboard event passed through the event tap.
    Tap {
        event: TapEvent,
        outcome: TapOutcome,
    },
    /// The OS disabled the event tap and it was turned back on.
    TapReenabled(TapDisableReason),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TouchBegin(_) => EventType::TouchBegin,
            Event::TouchUpdate(_) => EventType::TouchUpdate,
            Event::TouchEnd(_) => EventType::TouchEnd,
            Event::DeviceArrived(_) => EventType::DeviceArrived,
            Event::DeviceDeparted(_) => EventType::DeviceDeparted,
            Event::Tap { .. } => EventType::Tap,
            Event::TapReenabled(_) => EventType::TapReenabled,
        }
    }

    /// Check if this is a touch lifecycle event.
    pub fn is_touch(&self) -> bool {
        matches!(
            self,
            Event::TouchBegin(_) | Event::TouchUpdate(_) | Event::TouchEnd(_)
        )
    }

    /// The device this event concerns, if any.
    pub fn device(&self) -> Option<DeviceId> {
        match self {
            Event::TouchBegin(s) | Event::TouchUpdate(s) | Event::TouchEnd(s) => Some(s.device),
            Event::DeviceArrived(info) | Event::DeviceDeparted(info) => Some(info.id),
            Event::Tap { .. } | Event::TapReenabled(_) => None,
        }
    }

    /// The touch sample carried by a touch event.
    pub fn touch(&self) -> Option<&TouchSample> {
        match self {
            Event::TouchBegin(s) | Event::TouchUpdate(s) | Event::TouchEnd(s) => Some(s),
            _ => None,
        }
    }
}

impl From<TouchEvent> for Event {
    fn from(event: TouchEvent) -> Self {
        match event {
            TouchEvent::Begin(s) => Event::TouchBegin(s),
            TouchEvent::Update(s) => Event::TouchUpdate(s),
            TouchEvent::End(s) => Event::TouchEnd(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::TouchState;
    use crate::testing::contact;

    #[test]
    fn test_touch_event_conversion() {
        let sample = TouchSample {
            device: DeviceId::new(9),
            frame: 3,
            contact: contact(4, TouchState::Touching),
        };

        let event = Event::from(TouchEvent::Update(sample));
        assert_eq!(event.event_type(), EventType::TouchUpdate);
        assert!(event.is_touch());
        assert_eq!(event.device(), Some(DeviceId::new(9)));
        assert_eq!(event.touch().map(|s| s.contact.finger_id), Some(4));

        let end = Event::from(TouchEvent::End(sample));
        assert_eq!(end.event_type(), EventType::TouchEnd);
    }

    #[test]
    fn test_non_touch_events() {
        let arrived = Event::DeviceArrived(DeviceInfo {
            id: DeviceId::new(2),
        });
        assert!(!arrived.is_touch());
        assert_eq!(arrived.device(), Some(DeviceId::new(2)));
        assert!(arrived.touch().is_none());

        let reenabled = Event::TapReenabled(TapDisableReason::Timeout);
        assert_eq!(reenabled.event_type(), EventType::TapReenabled);
        assert_eq!(reenabled.device(), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_event_serializes() {
        let event = Event::DeviceArrived(DeviceInfo {
            id: DeviceId::new(0x10),
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
