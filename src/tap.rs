//! Global pointer and keyboard event tap.
//!
//! The OS calls the tap for every matching event on a latency-sensitive
//! path and will switch the tap off if the callback stalls. The session
//! therefore keeps the handler path short, mirrors every event into the
//! dispatch queue without blocking, and turns the tap back on whenever the
//! OS reports it disabled.

use crate::config::TapConfig;
use crate::error::InstallError;
use crate::event::Event;
use crate::gate::CallbackGate;
use crate::queue::EventSender;
use bitflags::bitflags;
use log::{error, info, trace, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

bitflags! {
    /// Event types a tap intercepts, at their CoreGraphics bit positions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct EventMask: u64 {
        const LEFT_MOUSE_DOWN = 1 << 1;
        const LEFT_MOUSE_UP = 1 << 2;
        const RIGHT_MOUSE_DOWN = 1 << 3;
        const RIGHT_MOUSE_UP = 1 << 4;
        const MOUSE_MOVED = 1 << 5;
        const LEFT_MOUSE_DRAGGED = 1 << 6;
        const RIGHT_MOUSE_DRAGGED = 1 << 7;
        const KEY_DOWN = 1 << 10;
        const KEY_UP = 1 << 11;
        const FLAGS_CHANGED = 1 << 12;
        const SCROLL_WHEEL = 1 << 22;
        const OTHER_MOUSE_DOWN = 1 << 25;
        const OTHER_MOUSE_UP = 1 << 26;
        const OTHER_MOUSE_DRAGGED = 1 << 27;

        const POINTER = Self::LEFT_MOUSE_DOWN.bits()
            | Self::LEFT_MOUSE_UP.bits()
            | Self::RIGHT_MOUSE_DOWN.bits()
            | Self::RIGHT_MOUSE_UP.bits()
            | Self::MOUSE_MOVED.bits()
            | Self::LEFT_MOUSE_DRAGGED.bits()
            | Self::RIGHT_MOUSE_DRAGGED.bits()
            | Self::SCROLL_WHEEL.bits()
            | Self::OTHER_MOUSE_DOWN.bits()
            | Self::OTHER_MOUSE_UP.bits()
            | Self::OTHER_MOUSE_DRAGGED.bits();
        const KEYBOARD = Self::KEY_DOWN.bits()
            | Self::KEY_UP.bits()
            | Self::FLAGS_CHANGED.bits();
        const ALL = Self::POINTER.bits() | Self::KEYBOARD.bits();
    }
}

/// A decoded CoreGraphics event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TapEventKind {
    LeftMouseDown,
    LeftMouseUp,
    RightMouseDown,
    RightMouseUp,
    MouseMoved,
    LeftMouseDragged,
    RightMouseDragged,
    KeyDown,
    KeyUp,
    FlagsChanged,
    ScrollWheel,
    OtherMouseDown,
    OtherMouseUp,
    OtherMouseDragged,
}

impl TapEventKind {
    pub const ALL: [TapEventKind; 14] = [
        TapEventKind::LeftMouseDown,
        TapEventKind::LeftMouseUp,
        TapEventKind::RightMouseDown,
        TapEventKind::RightMouseUp,
        TapEventKind::MouseMoved,
        TapEventKind::LeftMouseDragged,
        TapEventKind::RightMouseDragged,
        TapEventKind::KeyDown,
        TapEventKind::KeyUp,
        TapEventKind::FlagsChanged,
        TapEventKind::ScrollWheel,
        TapEventKind::OtherMouseDown,
        TapEventKind::OtherMouseUp,
        TapEventKind::OtherMouseDragged,
    ];

    /// The CoreGraphics event type number.
    pub fn raw(self) -> u32 {
        match self {
            TapEventKind::LeftMouseDown => 1,
            TapEventKind::LeftMouseUp => 2,
            TapEventKind::RightMouseDown => 3,
            TapEventKind::RightMouseUp => 4,
            TapEventKind::MouseMoved => 5,
            TapEventKind::LeftMouseDragged => 6,
            TapEventKind::RightMouseDragged => 7,
            TapEventKind::KeyDown => 10,
            TapEventKind::KeyUp => 11,
            TapEventKind::FlagsChanged => 12,
            TapEventKind::ScrollWheel => 22,
            TapEventKind::OtherMouseDown => 25,
            TapEventKind::OtherMouseUp => 26,
            TapEventKind::OtherMouseDragged => 27,
        }
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.raw() == raw)
    }

    pub fn mask(self) -> EventMask {
        EventMask::from_bits_truncate(1 << self.raw())
    }

    pub fn is_keyboard(self) -> bool {
        EventMask::KEYBOARD.contains(self.mask())
    }
}

/// Mouse buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Button {
    /// Left mouse button (Button 1).
    Left,
    /// Right mouse button (Button 2).
    Right,
    /// Middle mouse button (Button 3).
    Middle,
    /// Extra button 1 (typically back).
    Button4,
    /// Extra button 2 (typically forward).
    Button5,
    /// Unknown or unsupported button.
    Unknown(u8),
}

impl Button {
    /// Get the button number (1-indexed).
    pub fn number(&self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Right => 2,
            Button::Middle => 3,
            Button::Button4 => 4,
            Button::Button5 => 5,
            Button::Unknown(n) => *n,
        }
    }

    /// Create a Button from a number (1-indexed).
    pub fn from_number(n: u8) -> Self {
        match n {
            1 => Button::Left,
            2 => Button::Right,
            3 => Button::Middle,
            4 => Button::Button4,
            5 => Button::Button5,
            _ => Button::Unknown(n),
        }
    }
}

/// Scroll wheel deltas, in lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScrollDelta {
    /// Vertical axis. Positive scrolls up.
    pub dy: i64,
    /// Horizontal axis. Positive scrolls left.
    pub dx: i64,
}

/// One intercepted pointer or keyboard event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TapEvent {
    pub kind: TapEventKind,
    /// Global location in screen points.
    pub x: f64,
    pub y: f64,
    pub keycode: Option<u16>,
    pub button: Option<Button>,
    /// Raw modifier flags.
    pub flags: u64,
    pub scroll: Option<ScrollDelta>,
    pub time: SystemTime,
}

impl TapEvent {
    pub fn new(kind: TapEventKind, x: f64, y: f64) -> Self {
        Self {
            kind,
            x,
            y,
            keycode: None,
            button: None,
            flags: 0,
            scroll: None,
            time: SystemTime::now(),
        }
    }

    pub fn with_keycode(mut self, keycode: u16) -> Self {
        self.keycode = Some(keycode);
        self
    }

    pub fn with_button(mut self, button: Button) -> Self {
        self.button = Some(button);
        self
    }

    pub fn with_flags(mut self, flags: u64) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_scroll(mut self, scroll: ScrollDelta) -> Self {
        self.scroll = Some(scroll);
        self
    }
}

/// What the tap tells the OS to do with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Forward the original event untouched. The handler already has it by
    /// reference, so this variant carries no copy; use `Replace` to change it.
    PassThrough,
    /// Forward this event in place of the original.
    Replace(TapEvent),
    /// Drop the event before it reaches the rest of the system.
    Suppress,
}

/// What actually happened to an intercepted event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TapOutcome {
    PassedThrough,
    Replaced(TapEvent),
    Suppressed,
}

/// Why the OS disabled the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TapDisableReason {
    Timeout,
    UserInput,
}

/// Whether the tap may change the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TapMode {
    /// Decisions are applied.
    #[default]
    Intercepting,
    /// The handler observes only; every event passes through.
    Listening,
}

/// Where in the event pipeline the tap sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TapLocation {
    /// Where HID events enter the window server.
    Hid,
    /// Where HID and remote-control events enter a login session.
    #[default]
    Session,
}

/// Decides the fate of each intercepted event.
///
/// Runs on the OS event path: must return quickly and never block.
pub trait TapHandler: Send + Sync {
    fn on_event(&self, event: &TapEvent) -> Decision;
}

impl<F> TapHandler for F
where
    F: Fn(&TapEvent) -> Decision + Send + Sync,
{
    fn on_event(&self, event: &TapEvent) -> Decision {
        self(event)
    }
}

/// Passes every event through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughHandler;

impl TapHandler for PassThroughHandler {
    fn on_event(&self, _event: &TapEvent) -> Decision {
        Decision::PassThrough
    }
}

/// A created native tap.
pub trait TapPort: Send {
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Detach the tap from its run loop and invalidate it.
    fn invalidate(&mut self);
}

/// Creates native taps.
pub trait TapInstaller: Send + Sync {
    /// Create a disabled tap that calls [`TapContext`] for every event.
    fn create_tap(
        &self,
        config: &TapConfig,
        context: &Arc<TapContext>,
    ) -> Result<Box<dyn TapPort>, InstallError>;
}

/// Callback target of an installed tap.
pub struct TapContext {
    mode: TapMode,
    handler: Arc<dyn TapHandler>,
    sink: EventSender,
    port: Mutex<Option<Box<dyn TapPort>>>,
    reenables: AtomicU64,
    gate: CallbackGate,
}

impl TapContext {
    fn new(mode: TapMode, handler: Arc<dyn TapHandler>, sink: EventSender) -> Self {
        Self {
            mode,
            handler,
            sink,
            port: Mutex::new(None),
            reenables: AtomicU64::new(0),
            gate: CallbackGate::new(),
        }
    }

    pub fn mode(&self) -> TapMode {
        self.mode
    }

    /// Decide one event and mirror it into the dispatch queue.
    pub fn on_event(&self, event: TapEvent) -> Decision {
        let Some(_pass) = self.gate.enter() else {
            return Decision::PassThrough;
        };

        let mut decision = self.handler.on_event(&event);
        if self.mode == TapMode::Listening && decision != Decision::PassThrough {
            trace!("listening tap ignores {:?} decision", event.kind);
            decision = Decision::PassThrough;
        }

        let outcome = match &decision {
            Decision::PassThrough => TapOutcome::PassedThrough,
            Decision::Replace(replacement) => TapOutcome::Replaced(replacement.clone()),
            Decision::Suppress => TapOutcome::Suppressed,
        };
        self.sink.push(Event::Tap { event, outcome });
        decision
    }

    /// The OS switched the tap off.
    pub fn on_disabled(&self, reason: TapDisableReason) {
        let Some(_pass) = self.gate.enter() else {
            return;
        };

        warn!("event tap was disabled ({:?}), re-enabling", reason);
        if self.reenable() {
            self.sink.push(Event::TapReenabled(reason));
        }
    }

    /// Turn the tap back on. Returns `false` if it is no longer installed.
    pub fn reenable(&self) -> bool {
        let guard = match self.port.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("event tap mutex poisoned");
                return false;
            }
        };
        match guard.as_ref() {
            Some(port) => {
                port.set_enabled(true);
                self.reenables.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn reenable_count(&self) -> u64 {
        self.reenables.load(Ordering::Relaxed)
    }

    fn is_enabled(&self) -> bool {
        self.port
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|port| port.is_enabled()))
            .unwrap_or(false)
    }

    fn take_port(&self) -> Option<Box<dyn TapPort>> {
        self.port
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// One installed event tap.
pub struct EventTapSession {
    context: Arc<TapContext>,
}

impl EventTapSession {
    /// Create and enable a tap.
    pub fn install(
        installer: &dyn TapInstaller,
        config: &TapConfig,
        handler: Arc<dyn TapHandler>,
        sink: EventSender,
    ) -> Result<Self, InstallError> {
        let context = Arc::new(TapContext::new(config.mode, handler, sink));
        let port = installer.create_tap(config, &context)?;
        port.set_enabled(true);
        *context
            .port
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(port);

        info!(
            "event tap installed ({:?}, {:?} location)",
            config.mode, config.location
        );
        Ok(Self { context })
    }

    pub fn reenable(&self) -> bool {
        self.context.reenable()
    }

    pub fn is_enabled(&self) -> bool {
        self.context.is_enabled()
    }

    pub fn is_installed(&self) -> bool {
        self.context
            .port
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Times the tap was turned back on after the OS disabled it.
    pub fn reenable_count(&self) -> u64 {
        self.context.reenable_count()
    }

    /// Disable and remove the tap. Safe to call repeatedly.
    pub fn uninstall(&mut self) {
        let Some(mut port) = self.context.take_port() else {
            return;
        };
        port.set_enabled(false);
        self.context.gate.close_and_wait();
        port.invalidate();
        info!("event tap uninstalled");
    }
}

impl Drop for EventTapSession {
    fn drop(&mut self) {
        self.uninstall();
    }
}
