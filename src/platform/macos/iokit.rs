//! IOKit service matching notifications.

use super::ffi;
use crate::error::RegisterError;
use crate::hotplug::{
    IteratorToken, NotificationSide, NotificationSource, NotifyContext, ObjectToken, PortToken,
};
use log::trace;
use objc2_core_foundation::{CFRunLoop, CFRunLoopSource, kCFRunLoopDefaultMode};
use std::ffi::{CString, c_void};
use std::sync::Arc;

unsafe extern "C" fn service_callback(refcon: *mut c_void, iterator: ffi::io_iterator_t) {
    if refcon.is_null() {
        return;
    }
    // The context outlives its iterator, and the iterator is released
    // before the context is dropped.
    let context = unsafe { &*(refcon as *const NotifyContext) };
    context.notify(IteratorToken(iterator));
}

/// IOKit notification ports and iterators.
pub(crate) struct IoKitNotifications;

impl NotificationSource for IoKitNotifications {
    fn create_port(&self) -> Result<PortToken, RegisterError> {
        unsafe {
            let port = ffi::IONotificationPortCreate(ffi::IO_MAIN_PORT_DEFAULT);
            if port.is_null() {
                return Err(RegisterError::PortCreation(
                    "IONotificationPortCreate returned null".into(),
                ));
            }

            let source = ffi::IONotificationPortGetRunLoopSource(port);
            let Some(run_loop) = CFRunLoop::current() else {
                ffi::IONotificationPortDestroy(port);
                return Err(RegisterError::PortCreation("no current run loop".into()));
            };
            if source.is_null() {
                ffi::IONotificationPortDestroy(port);
                return Err(RegisterError::PortCreation(
                    "notification port has no run loop source".into(),
                ));
            }
            let source = &*(source as *const CFRunLoopSource);
            run_loop.add_source(Some(source), kCFRunLoopDefaultMode);

            Ok(PortToken(port as usize))
        }
    }

    fn add_notification(
        &self,
        port: PortToken,
        side: NotificationSide,
        class: &str,
        context: &Arc<NotifyContext>,
    ) -> Result<IteratorToken, RegisterError> {
        let name = CString::new(class)
            .map_err(|_| RegisterError::Matching(format!("invalid class name {:?}", class)))?;
        let kind = match side {
            NotificationSide::Arrival => ffi::IO_FIRST_MATCH_NOTIFICATION,
            NotificationSide::Departure => ffi::IO_TERMINATED_NOTIFICATION,
        };

        unsafe {
            let matching = ffi::IOServiceMatching(name.as_ptr());
            if matching.is_null() {
                return Err(RegisterError::Matching(class.to_string()));
            }

            let mut iterator: ffi::io_iterator_t = 0;
            // Consumes the matching dictionary
            let code = ffi::IOServiceAddMatchingNotification(
                port.0 as ffi::IONotificationPortRef,
                kind.as_ptr(),
                matching,
                service_callback,
                Arc::as_ptr(context) as *mut c_void,
                &mut iterator,
            );
            if code != ffi::KERN_SUCCESS {
                return Err(RegisterError::Notification { side, code });
            }
            trace!("{} notification armed for {}", side, class);
            Ok(IteratorToken(iterator))
        }
    }

    fn next_object(&self, iterator: IteratorToken) -> Option<ObjectToken> {
        match unsafe { ffi::IOIteratorNext(iterator.0) } {
            0 => None,
            object => Some(ObjectToken(object)),
        }
    }

    fn release_object(&self, object: ObjectToken) {
        unsafe { ffi::IOObjectRelease(object.0) };
    }

    fn release_iterator(&self, iterator: IteratorToken) {
        unsafe { ffi::IOObjectRelease(iterator.0) };
    }

    fn destroy_port(&self, port: PortToken) {
        // Also removes the port's run loop source
        unsafe { ffi::IONotificationPortDestroy(port.0 as ffi::IONotificationPortRef) };
    }
}
