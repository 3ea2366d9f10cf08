//! CGEventTap installation and callback.

#![allow(unsafe_op_in_unsafe_fn)]

use crate::config::TapConfig;
use crate::error::InstallError;
use crate::tap::{
    Button, Decision, ScrollDelta, TapContext, TapDisableReason, TapEvent, TapEventKind,
    TapInstaller, TapLocation, TapMode, TapPort,
};
use core::ptr::NonNull;
use objc2_core_foundation::{
    CFMachPort, CFRetained, CFRunLoop, CFRunLoopSource, CGPoint, kCFRunLoopCommonModes,
};
use objc2_core_graphics::{
    CGEvent, CGEventField, CGEventFlags, CGEventTapCallBack, CGEventTapLocation,
    CGEventTapOptions, CGEventTapPlacement, CGEventTapProxy, CGEventType,
};
use std::ffi::c_void;
use std::ptr::null_mut;
use std::sync::Arc;

/// The CGEventTap callback
unsafe extern "C-unwind" fn tap_callback(
    _proxy: CGEventTapProxy,
    event_type: CGEventType,
    cg_event: NonNull<CGEvent>,
    user_info: *mut c_void,
) -> *mut CGEvent {
    if user_info.is_null() {
        return cg_event.as_ptr();
    }
    let context = &*(user_info as *const TapContext);

    if event_type == CGEventType::TapDisabledByTimeout {
        context.on_disabled(TapDisableReason::Timeout);
        return cg_event.as_ptr();
    }
    if event_type == CGEventType::TapDisabledByUserInput {
        context.on_disabled(TapDisableReason::UserInput);
        return cg_event.as_ptr();
    }

    let Some(event) = convert_event(event_type, cg_event) else {
        return cg_event.as_ptr();
    };

    match context.on_event(event) {
        Decision::PassThrough => cg_event.as_ptr(),
        // A null return drops the event from the pipeline
        Decision::Suppress => null_mut(),
        Decision::Replace(replacement) => {
            apply_replacement(cg_event, &replacement);
            cg_event.as_ptr()
        }
    }
}

/// Convert button number (0-indexed) to Button enum
fn number_to_button(button: i64) -> Button {
    Button::from_number(u8::try_from(button + 1).unwrap_or(0))
}

/// Convert a CGEvent to a TapEvent
unsafe fn convert_event(event_type: CGEventType, cg_event: NonNull<CGEvent>) -> Option<TapEvent> {
    let kind = TapEventKind::from_raw(event_type.0)?;
    let event = Some(cg_event.as_ref());

    let point = CGEvent::location(event);
    let flags = CGEvent::flags(event);
    let mut tap_event = TapEvent::new(kind, point.x, point.y).with_flags(flags.0);

    if kind.is_keyboard() {
        let code = CGEvent::integer_value_field(event, CGEventField::KeyboardEventKeycode);
        tap_event = tap_event.with_keycode(code as u16);
    }

    let button = match kind {
        TapEventKind::LeftMouseDown | TapEventKind::LeftMouseUp | TapEventKind::LeftMouseDragged => {
            Some(Button::Left)
        }
        TapEventKind::RightMouseDown
        | TapEventKind::RightMouseUp
        | TapEventKind::RightMouseDragged => Some(Button::Right),
        TapEventKind::OtherMouseDown
        | TapEventKind::OtherMouseUp
        | TapEventKind::OtherMouseDragged => {
            let number =
                CGEvent::integer_value_field(event, CGEventField::MouseEventButtonNumber);
            Some(number_to_button(number))
        }
        _ => None,
    };
    if let Some(button) = button {
        tap_event = tap_event.with_button(button);
    }

    if kind == TapEventKind::ScrollWheel {
        tap_event = tap_event.with_scroll(ScrollDelta {
            dy: CGEvent::integer_value_field(event, CGEventField::ScrollWheelEventDeltaAxis1),
            dx: CGEvent::integer_value_field(event, CGEventField::ScrollWheelEventDeltaAxis2),
        });
    }

    Some(tap_event)
}

/// Write the replacement's location, flags and keycode into the native event.
unsafe fn apply_replacement(cg_event: NonNull<CGEvent>, replacement: &TapEvent) {
    let event = Some(cg_event.as_ref());
    CGEvent::set_location(
        event,
        CGPoint {
            x: replacement.x,
            y: replacement.y,
        },
    );
    CGEvent::set_flags(event, CGEventFlags(replacement.flags));
    if let Some(code) = replacement.keycode {
        CGEvent::set_integer_value_field(
            event,
            CGEventField::KeyboardEventKeycode,
            i64::from(code),
        );
    }
}

/// A live CGEventTap and its run loop source.
struct MachTapPort {
    tap: CFRetained<CFMachPort>,
    source: CFRetained<CFRunLoopSource>,
    run_loop: CFRetained<CFRunLoop>,
    invalidated: bool,
}

// Safety: CGEventTapEnable, CFRunLoopRemoveSource and CFMachPortInvalidate
// may be called from any thread.
unsafe impl Send for MachTapPort {}

impl TapPort for MachTapPort {
    fn set_enabled(&self, enabled: bool) {
        if !self.invalidated {
            CGEvent::tap_enable(&self.tap, enabled);
        }
    }

    fn is_enabled(&self) -> bool {
        !self.invalidated && CGEvent::tap_is_enabled(&self.tap)
    }

    fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        unsafe {
            self.run_loop
                .remove_source(Some(&self.source), kCFRunLoopCommonModes);
        }
        self.tap.invalidate();
        self.invalidated = true;
    }
}

/// Installs taps on the calling thread's run loop.
pub(crate) struct EventTapInstaller;

impl TapInstaller for EventTapInstaller {
    fn create_tap(
        &self,
        config: &TapConfig,
        context: &Arc<TapContext>,
    ) -> Result<Box<dyn TapPort>, InstallError> {
        let location = match config.location {
            TapLocation::Hid => CGEventTapLocation::HIDEventTap,
            TapLocation::Session => CGEventTapLocation::SessionEventTap,
        };
        let options = match config.mode {
            TapMode::Intercepting => CGEventTapOptions::Default,
            TapMode::Listening => CGEventTapOptions::ListenOnly,
        };

        unsafe {
            let callback: CGEventTapCallBack = Some(tap_callback);
            let tap = CGEvent::tap_create(
                location,
                CGEventTapPlacement::HeadInsertEventTap,
                options,
                config.mask.bits(),
                callback,
                Arc::as_ptr(context) as *mut c_void,
            )
            .ok_or_else(|| {
                InstallError::PermissionDenied(
                    "Failed to create event tap. Make sure Accessibility permissions are granted."
                        .into(),
                )
            })?;

            let source = CFMachPort::new_run_loop_source(None, Some(&tap), 0).ok_or_else(|| {
                InstallError::RunLoopSource("Failed to create run loop source".into())
            })?;

            let run_loop = CFRunLoop::current().ok_or_else(|| {
                InstallError::RunLoopSource("Failed to get current run loop".into())
            })?;
            run_loop.add_source(Some(&source), kCFRunLoopCommonModes);

            Ok(Box::new(MachTapPort {
                tap,
                source,
                run_loop,
                invalidated: false,
            }))
        }
    }
}
