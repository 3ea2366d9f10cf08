//! Device hotplug notifications.
//!
//! The OS service layer signals device arrival and departure through
//! notification iterators. An iterator only re-arms after every pending
//! entry has been consumed, so each side is drained once right after
//! registration and again on every delivery. Draining the arrival side at
//! registration time is also how devices that were already plugged in get
//! reported.

use crate::error::RegisterError;
use crate::gate::CallbackGate;
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::Arc;

/// Which notification stream an iterator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationSide {
    Arrival,
    Departure,
}

impl fmt::Display for NotificationSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationSide::Arrival => f.write_str("arrival"),
            NotificationSide::Departure => f.write_str("departure"),
        }
    }
}

/// Native notification port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortToken(pub usize);

/// Native notification iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IteratorToken(pub u32);

/// One service object yielded by an iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectToken(pub u32);

/// The OS notification service.
pub trait NotificationSource: Send + Sync {
    fn create_port(&self) -> Result<PortToken, RegisterError>;

    /// Arm one side for services of `class`. Deliveries call
    /// [`NotifyContext::notify`] on `context` until the iterator is released.
    fn add_notification(
        &self,
        port: PortToken,
        side: NotificationSide,
        class: &str,
        context: &Arc<NotifyContext>,
    ) -> Result<IteratorToken, RegisterError>;

    fn next_object(&self, iterator: IteratorToken) -> Option<ObjectToken>;

    fn release_object(&self, object: ObjectToken);

    fn release_iterator(&self, iterator: IteratorToken);

    fn destroy_port(&self, port: PortToken);
}

/// Receives the "devices changed" signal.
pub trait DeviceChangeListener: Send + Sync {
    fn devices_changed(&self, side: NotificationSide);
}

/// Callback target for one notification side.
pub struct NotifyContext {
    side: NotificationSide,
    source: Arc<dyn NotificationSource>,
    listener: Arc<dyn DeviceChangeListener>,
    gate: CallbackGate,
}

impl NotifyContext {
    fn new(
        side: NotificationSide,
        source: Arc<dyn NotificationSource>,
        listener: Arc<dyn DeviceChangeListener>,
    ) -> Self {
        Self {
            side,
            source,
            listener,
            gate: CallbackGate::new(),
        }
    }

    pub fn side(&self) -> NotificationSide {
        self.side
    }

    /// Handle one delivery: drain the iterator, then tell the listener.
    pub fn notify(&self, iterator: IteratorToken) {
        let Some(_pass) = self.gate.enter() else {
            return;
        };

        let drained = self.drain(iterator);
        if drained == 0 {
            trace!("spurious {} notification", self.side);
            return;
        }
        debug!("{} notification for {} service(s)", self.side, drained);
        self.listener.devices_changed(self.side);
    }

    fn drain(&self, iterator: IteratorToken) -> usize {
        let mut count = 0;
        while let Some(object) = self.source.next_object(iterator) {
            self.source.release_object(object);
            count += 1;
        }
        count
    }
}

/// An armed notification iterator together with its callback target.
pub struct NotificationIterator {
    token: Option<IteratorToken>,
    context: Arc<NotifyContext>,
}

impl NotificationIterator {
    pub fn side(&self) -> NotificationSide {
        self.context.side
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    /// Consume and release every pending entry. Returns how many there were.
    pub fn drain(&self) -> usize {
        match self.token {
            Some(token) => self.context.drain(token),
            None => 0,
        }
    }

    /// Stop deliveries and release the iterator. Safe to call repeatedly.
    pub fn release(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        self.context.gate.close_and_wait();
        self.context.source.release_iterator(token);
        trace!("released {} iterator", self.context.side);
    }
}

impl Drop for NotificationIterator {
    fn drop(&mut self) {
        self.release();
    }
}

/// Everything one successful registration owns.
pub struct NotificationHandles {
    port: Option<PortToken>,
    arrival: Option<NotificationIterator>,
    departure: Option<NotificationIterator>,
    source: Arc<dyn NotificationSource>,
}

impl NotificationHandles {
    pub fn is_active(&self) -> bool {
        self.port.is_some()
    }

    /// Release both iterators, then the port.
    ///
    /// Idempotent, and safe on a partially built set of handles.
    pub fn teardown(&mut self) {
        if let Some(mut departure) = self.departure.take() {
            departure.release();
        }
        if let Some(mut arrival) = self.arrival.take() {
            arrival.release();
        }
        if let Some(port) = self.port.take() {
            self.source.destroy_port(port);
            debug!("hotplug notifications torn down");
        }
    }
}

impl Drop for NotificationHandles {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Registers hotplug notifications for a device class.
pub struct HotplugNotifier {
    source: Arc<dyn NotificationSource>,
    listener: Arc<dyn DeviceChangeListener>,
}

impl HotplugNotifier {
    pub fn new(
        source: Arc<dyn NotificationSource>,
        listener: Arc<dyn DeviceChangeListener>,
    ) -> Self {
        Self { source, listener }
    }

    /// Arm both sides for `class` and report devices already present.
    ///
    /// On failure nothing stays registered.
    pub fn register(&self, class: &str) -> Result<NotificationHandles, RegisterError> {
        let port = self.source.create_port()?;
        let mut handles = NotificationHandles {
            port: Some(port),
            arrival: None,
            departure: None,
            source: self.source.clone(),
        };

        if let Err(e) = self.arm_both(&mut handles, port, class) {
            warn!("hotplug registration for {} failed: {}", class, e);
            handles.teardown();
            return Err(e);
        }

        let present = handles.arrival.as_ref().map_or(0, |it| it.drain());
        let gone = handles.departure.as_ref().map_or(0, |it| it.drain());
        trace!("initial drain: {} present, {} departed", present, gone);

        info!("registered hotplug notifications for {}", class);
        if present > 0 {
            self.listener.devices_changed(NotificationSide::Arrival);
        }
        Ok(handles)
    }

    fn arm_both(
        &self,
        handles: &mut NotificationHandles,
        port: PortToken,
        class: &str,
    ) -> Result<(), RegisterError> {
        handles.arrival = Some(self.arm(port, NotificationSide::Arrival, class)?);
        handles.departure = Some(self.arm(port, NotificationSide::Departure, class)?);
        Ok(())
    }

    fn arm(
        &self,
        port: PortToken,
        side: NotificationSide,
        class: &str,
    ) -> Result<NotificationIterator, RegisterError> {
        let context = Arc::new(NotifyContext::new(
            side,
            self.source.clone(),
            self.listener.clone(),
        ));
        let token = self.source.add_notification(port, side, class, &context)?;
        Ok(NotificationIterator {
            token: Some(token),
            context,
        })
    }
}
