//! Quiescence gate for native callback targets.
//!
//! Native callbacks arrive on threads we do not own, so a callback target
//! can still be executing when its owner decides to tear it down. Every
//! callback body enters the gate first; teardown closes the gate and then
//! waits until no callback is inside before the native resource is released.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct GateState {
    open: bool,
    in_flight: usize,
}

/// Open/closed flag plus a count of callbacks currently executing.
#[derive(Debug)]
pub(crate) struct CallbackGate {
    state: Mutex<GateState>,
    drained: Condvar,
}

/// Held by a callback for the duration of its body.
pub(crate) struct GatePass<'a> {
    gate: &'a CallbackGate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        state.in_flight -= 1;
        if state.in_flight == 0 {
            self.gate.drained.notify_all();
        }
    }
}

impl CallbackGate {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                in_flight: 0,
            }),
            drained: Condvar::new(),
        }
    }

    // The guarded section never panics, so a poisoned lock still holds a
    // consistent count.
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enter the gate. Returns `None` once the gate has been closed.
    pub(crate) fn enter(&self) -> Option<GatePass<'_>> {
        let mut state = self.lock();
        if !state.open {
            return None;
        }
        state.in_flight += 1;
        Some(GatePass { gate: self })
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Close the gate and park until every in-flight callback has left.
    ///
    /// Must not be called from inside a callback holding a pass on the same gate.
    pub(crate) fn close_and_wait(&self) {
        let mut state = self.lock();
        state.open = false;
        while state.in_flight != 0 {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Default for CallbackGate {
    fn default() -> Self {
        Self::new()
    }
}
