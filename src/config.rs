//! Monitor configuration.

use crate::error::{Error, Result};
use crate::tap::{EventMask, TapLocation, TapMode};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// IOKit class matched for hotplug notifications by default.
pub const DEFAULT_DEVICE_CLASS: &str = "AppleMultitouchDevice";

/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Event tap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TapConfig {
    pub mask: EventMask,
    pub mode: TapMode,
    pub location: TapLocation,
}

impl TapConfig {
    pub fn new(mask: EventMask) -> Self {
        Self {
            mask,
            mode: TapMode::default(),
            location: TapLocation::default(),
        }
    }

    /// Observe events without being able to change them.
    pub fn listening(mask: EventMask) -> Self {
        Self::new(mask).with_mode(TapMode::Listening)
    }

    pub fn with_mode(mut self, mode: TapMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_location(mut self, location: TapLocation) -> Self {
        self.location = location;
        self
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        Self::new(EventMask::ALL)
    }
}

/// Everything a [`Monitor`](crate::Monitor) needs to know up front.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MonitorConfig {
    /// IOKit class name matched for device hotplug.
    pub device_class: String,
    /// Dispatch queue capacity. `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Start devices as soon as they are attached.
    pub auto_start: bool,
    /// Skip touch updates whose state and geometry did not change.
    pub suppress_unchanged_updates: bool,
    /// Install an event tap as well. `None` monitors touch devices only.
    pub tap: Option<TapConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_class: DEFAULT_DEVICE_CLASS.to_string(),
            queue_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            auto_start: true,
            suppress_unchanged_updates: true,
            tap: None,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = class.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: Option<usize>) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_suppress_unchanged_updates(mut self, suppress: bool) -> Self {
        self.suppress_unchanged_updates = suppress;
        self
    }

    pub fn with_tap(mut self, tap: TapConfig) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_class.trim().is_empty() {
            return Err(Error::InvalidConfig("device class is empty".into()));
        }
        if self.queue_capacity == Some(0) {
            return Err(Error::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        if let Some(tap) = &self.tap
            && tap.mask.is_empty()
        {
            return Err(Error::InvalidConfig("event tap mask is empty".into()));
        }
        Ok(())
    }
}
