//! # touchwatch
//!
//! Multitouch contact tracking, device hotplug and event tap interception
//! for macOS.
//!
//! ## Features
//!
//! - Per-finger touch lifecycle events (begin, update, end) decoded from the
//!   MultitouchSupport contact frame callback
//! - Touch device arrival and departure through IOKit matching notifications,
//!   including devices that were already attached at startup
//! - A global CGEventTap that can pass through, replace or suppress pointer
//!   and keyboard events, and that recovers when the OS disables it
//! - One non-blocking dispatch queue that every native callback feeds
//! - Inertial coasting computed from the queue: release velocity, decay and
//!   screen-edge clamping for callers that glide the cursor themselves
//!
//! ## Quick Start
//!
//! ```no_run
//! use touchwatch::{Event, MonitorConfig};
//!
//! let (mut handle, events) = touchwatch::start(MonitorConfig::default())
//!     .expect("Failed to start monitor");
//!
//! for event in events.iter() {
//!     match event {
//!         Event::TouchBegin(sample) => println!("finger {} down", sample.contact.finger_id),
//!         Event::TouchEnd(sample) => println!("finger {} up", sample.contact.finger_id),
//!         Event::DeviceArrived(info) => println!("device {} attached", info.id),
//!         _ => {}
//!     }
//! }
//! # handle.stop().unwrap();
//! ```
//!
//! ### Intercepting Events
//!
//! ```no_run
//! use touchwatch::{Decision, EventMask, Monitor, MonitorConfig, TapConfig, TapEvent, TapEventKind};
//!
//! let config = MonitorConfig::default().with_tap(TapConfig::new(EventMask::KEYBOARD));
//! let (_handle, events) = Monitor::new(config)
//!     .with_tap_handler(|event: &TapEvent| {
//!         // Swallow the Escape key
//!         if event.kind == TapEventKind::KeyDown && event.keycode == Some(53) {
//!             Decision::Suppress
//!         } else {
//!             Decision::PassThrough
//!         }
//!     })
//!     .start()
//!     .expect("Failed to start monitor");
//! # drop(events);
//! ```
//!
//! ## Architecture
//!
//! Native callbacks arrive on a run-loop thread owned by the monitor. Each
//! callback target sits behind a quiescence gate, so tearing a device,
//! notification or tap down first stops deliveries, then waits for any
//! callback still running, and only then releases the native resource.

pub mod coast;
pub mod config;
pub mod contact;
pub mod device;
pub mod error;
pub mod event;
mod gate;
pub mod hotplug;
pub mod monitor;
pub mod queue;
pub mod tap;
pub mod tracker;

mod platform;

#[cfg(test)]
mod testing;

// Re-exports
pub use coast::{CoastOptions, CoastStep, Coaster, ScreenBounds};
pub use config::{MonitorConfig, TapConfig};
pub use contact::{Contact, Frame, Point, RawFinger, TouchState, Vector, decode_frame};
pub use device::{
    Device, DeviceId, DeviceInfo, DeviceRegistry, DeviceState, FrameRoute, NativeHandle,
    RegistryOptions, TouchFramework,
};
pub use error::{
    AttachError, DecodeError, Error, InstallError, RegisterError, Result, StartError,
};
pub use event::{Event, EventType};
pub use hotplug::{
    DeviceChangeListener, HotplugNotifier, NotificationHandles, NotificationSide,
    NotificationSource,
};
pub use monitor::{Backends, Monitor, MonitorHandle, MonitorSession, start};
pub use queue::{EventReceiver, EventSender};
pub use tap::{
    Button, Decision, EventMask, EventTapSession, ScrollDelta, TapDisableReason, TapEvent,
    TapEventKind, TapHandler, TapInstaller, TapLocation, TapMode, TapOutcome, TapPort,
};
pub use tracker::{TouchEvent, TouchSample, TouchTracker, TrackerOptions};
