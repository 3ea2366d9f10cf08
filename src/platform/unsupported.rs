//! Fallback for hosts without the native touch frameworks.

use crate::error::{Error, Result};
use crate::monitor::Backends;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) fn backends() -> Result<Backends> {
    Err(Error::NotSupported(format!(
        "native touch monitoring is not available on {}",
        std::env::consts::OS
    )))
}

/// Parks the monitor thread until woken.
#[derive(Clone, Default)]
pub(crate) struct RunLoop {
    woken: Arc<(Mutex<bool>, Condvar)>,
}

impl RunLoop {
    pub(crate) fn current() -> Result<Self> {
        Ok(Self::default())
    }

    pub(crate) fn run_while(&self, running: &AtomicBool) {
        let (lock, cvar) = &*self.woken;
        let mut woken = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while running.load(Ordering::SeqCst) && !*woken {
            woken = match cvar.wait_timeout(woken, POLL_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub(crate) fn wake(&self) {
        let (lock, cvar) = &*self.woken;
        *lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        cvar.notify_all();
    }
}
