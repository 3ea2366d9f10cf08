//! macOS bindings: MultitouchSupport, IOKit and CoreGraphics.

mod eventtap;
mod ffi;
mod iokit;
mod multitouch;

use crate::error::{Error, Result};
use crate::monitor::Backends;
use objc2_core_foundation::{CFRetained, CFRunLoop, CFRunLoopRunResult, kCFRunLoopDefaultMode};
use objc2_foundation::NSAutoreleasePool;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Longest stretch the run loop runs before the stop flag is checked again.
const RUN_SLICE: Duration = Duration::from_millis(250);

pub(crate) fn backends() -> Result<Backends> {
    Ok(Backends {
        touch: Arc::new(multitouch::Multitouch),
        notifications: Arc::new(iokit::IoKitNotifications),
        tap: Arc::new(eventtap::EventTapInstaller),
    })
}

/// The monitor thread's CFRunLoop.
#[derive(Clone)]
pub(crate) struct RunLoop {
    inner: CFRetained<CFRunLoop>,
}

// Safety: CFRunLoopStop and CFRunLoopWakeUp are thread-safe, and the loop
// itself is only run on the thread that created this handle.
unsafe impl Send for RunLoop {}
unsafe impl Sync for RunLoop {}

impl RunLoop {
    pub(crate) fn current() -> Result<Self> {
        CFRunLoop::current()
            .map(|inner| Self { inner })
            .ok_or_else(|| Error::Platform("Failed to get current run loop".into()))
    }

    /// Run until `running` is cleared.
    ///
    /// Runs in slices so a stop requested before the loop started is still
    /// observed.
    pub(crate) fn run_while(&self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let result = unsafe {
                let _pool = NSAutoreleasePool::new();
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_SLICE.as_secs_f64(), false)
            };
            if result == CFRunLoopRunResult::Finished {
                // No sources left in the mode; the loop returns immediately
                std::thread::sleep(RUN_SLICE);
            }
        }
    }

    pub(crate) fn wake(&self) {
        self.inner.stop();
        self.inner.wake_up();
    }
}
