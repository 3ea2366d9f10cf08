//! Touch device registry.
//!
//! The registry owns every attached device's native handle and its frame
//! callback registration. Frames for a device are routed through a
//! [`FrameRoute`] to exactly one [`TouchTracker`] for as long as the device
//! stays attached.
//!
//! Release ordering is enforced by construction: a [`Device`] releases its
//! native handle only when dropped, and the registry drops a device only
//! after unregistering its callback and waiting out any frame still being
//! delivered.

use crate::contact::Frame;
use crate::error::{AttachError, DecodeError, StartError};
use crate::event::Event;
use crate::gate::CallbackGate;
use crate::hotplug::{DeviceChangeListener, NotificationSide};
use crate::queue::EventSender;
use crate::tracker::{TouchTracker, TrackerOptions};
use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Process-local identity of an attached touch device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceId(u64);

impl DeviceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mt-{:x}", self.0)
    }
}

/// Opaque native device reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub fn from_ptr(ptr: *const c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Identity derived from the handle.
    pub fn id(self) -> DeviceId {
        DeviceId(self.0 as u64)
    }
}

/// Lifecycle state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceState {
    /// Enumerated, no callback registered.
    Discovered,
    /// Frame callback registered, not yet delivering.
    Registered,
    /// Delivering frames.
    Started,
    /// Delivery stopped, callback unregistered.
    Stopped,
    /// Detached; the handle is about to be released.
    Removed,
}

/// Snapshot of a device carried by consumer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    pub id: DeviceId,
}

/// The native multitouch framework, seen from the registry.
///
/// Handles returned by [`device_list`](TouchFramework::device_list) are
/// retained; each must be passed to [`release`](TouchFramework::release)
/// exactly once, which only [`Device`]'s drop does.
pub trait TouchFramework: Send + Sync {
    /// Currently present devices, one retained handle each.
    fn device_list(&self) -> Vec<NativeHandle>;

    /// Route the device's contact frames to `route`.
    fn register_frames(
        &self,
        handle: NativeHandle,
        route: Arc<FrameRoute>,
    ) -> std::result::Result<(), String>;

    /// Stop routing the device's frames. Frames already being delivered may
    /// still reach the route after this returns.
    fn unregister_frames(&self, handle: NativeHandle);

    fn start(&self, handle: NativeHandle) -> std::result::Result<(), String>;

    fn stop(&self, handle: NativeHandle);

    fn release(&self, handle: NativeHandle);
}

/// An enumerated device that owns one retained native handle.
pub struct Device {
    id: DeviceId,
    handle: NativeHandle,
    state: DeviceState,
    framework: Arc<dyn TouchFramework>,
}

impl Device {
    fn discovered(handle: NativeHandle, framework: Arc<dyn TouchFramework>) -> Self {
        Self {
            id: handle.id(),
            handle,
            state: DeviceState::Discovered,
            framework,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo { id: self.id }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if matches!(self.state, DeviceState::Registered | DeviceState::Started) {
            // Releasing here would let the framework deliver into freed memory.
            // Leak the handle instead and fail loudly.
            if !std::thread::panicking() {
                panic!(
                    "device {} released while its frame callback is still registered",
                    self.id
                );
            }
            return;
        }
        trace!("releasing device {}", self.id);
        self.framework.release(self.handle);
    }
}

/// Callback target for one device's frames.
pub struct FrameRoute {
    device: DeviceId,
    tracker: Mutex<TouchTracker>,
    sink: EventSender,
    gate: CallbackGate,
}

impl FrameRoute {
    fn new(device: DeviceId, options: TrackerOptions, sink: EventSender) -> Self {
        Self {
            device,
            tracker: Mutex::new(TouchTracker::new(device, options)),
            sink,
            gate: CallbackGate::new(),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Deliver one decoded frame from the native callback.
    ///
    /// Decode failures are logged and the frame is dropped.
    pub fn deliver(&self, decoded: std::result::Result<Frame, DecodeError>) {
        let Some(_pass) = self.gate.enter() else {
            return;
        };

        let frame = match decoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!("device {}: dropping malformed frame: {}", self.device, e);
                return;
            }
        };

        let events = match self.tracker.lock() {
            Ok(mut tracker) => tracker.on_frame(&frame),
            Err(_) => {
                error!("device {}: tracker mutex poisoned", self.device);
                return;
            }
        };

        for event in events {
            self.sink.push(event.into());
        }
    }

    /// Stop accepting frames, wait out any frame in flight, then end every
    /// finger still in contact.
    fn close(&self) {
        self.gate.close_and_wait();
        let ends = match self.tracker.lock() {
            Ok(mut tracker) => tracker.reset(),
            Err(poisoned) => poisoned.into_inner().reset(),
        };
        for event in ends {
            self.sink.push(event.into());
        }
    }
}

/// Registry behavior knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Start devices as soon as reconciliation attaches them.
    pub auto_start: bool,
    pub tracker: TrackerOptions,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            auto_start: true,
            tracker: TrackerOptions::default(),
        }
    }
}

struct Entry {
    device: Device,
    route: Arc<FrameRoute>,
}

/// Owner of every attached device.
pub struct DeviceRegistry {
    framework: Arc<dyn TouchFramework>,
    sink: EventSender,
    options: RegistryOptions,
    entries: Mutex<HashMap<DeviceId, Entry>>,
}

impl DeviceRegistry {
    pub fn new(
        framework: Arc<dyn TouchFramework>,
        sink: EventSender,
        options: RegistryOptions,
    ) -> Self {
        Self {
            framework,
            sink,
            options,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerate the devices present right now.
    ///
    /// Does not change registry state. Returned devices that are never
    /// attached release their handle when dropped.
    pub fn discover(&self) -> Vec<Device> {
        self.framework
            .device_list()
            .into_iter()
            .map(|handle| Device::discovered(handle, self.framework.clone()))
            .collect()
    }

    /// Register the device's frame callback and take ownership of it.
    pub fn attach(&self, mut device: Device) -> std::result::Result<(), AttachError> {
        let mut entries = self.lock_entries();
        if entries.contains_key(&device.id) {
            return Err(AttachError::AlreadyAttached(device.id));
        }

        let route = Arc::new(FrameRoute::new(
            device.id,
            self.options.tracker,
            self.sink.clone(),
        ));
        self.framework
            .register_frames(device.handle, route.clone())
            .map_err(|reason| AttachError::Registration {
                device: device.id,
                reason,
            })?;

        device.state = DeviceState::Registered;
        debug!("device {} registered", device.id);
        entries.insert(device.id, Entry { device, route });
        Ok(())
    }

    /// Begin frame delivery. Starting a started device does nothing.
    pub fn start(&self, id: DeviceId) -> std::result::Result<(), StartError> {
        let mut entries = self.lock_entries();
        let entry = entries.get_mut(&id).ok_or(StartError::NotAttached(id))?;
        if entry.device.state == DeviceState::Started {
            trace!("device {} already started", id);
            return Ok(());
        }

        self.framework
            .start(entry.device.handle)
            .map_err(|reason| StartError::Framework { device: id, reason })?;
        entry.device.state = DeviceState::Started;
        debug!("device {} started", id);
        Ok(())
    }

    /// Unregister, quiesce, stop and release a device.
    ///
    /// Returns `None` if the device was not attached.
    pub fn detach(&self, id: DeviceId) -> Option<DeviceInfo> {
        let entry = self.lock_entries().remove(&id)?;
        Some(self.teardown(entry))
    }

    /// Detach every device.
    pub fn detach_all(&self) -> Vec<DeviceInfo> {
        let entries: Vec<Entry> = self.lock_entries().drain().map(|(_, e)| e).collect();
        entries.into_iter().map(|e| self.teardown(e)).collect()
    }

    /// Bring the registry in line with the devices present now.
    ///
    /// Departed devices are detached and announced first, then new devices
    /// are attached (and started when configured) and announced.
    pub fn reconcile(&self) {
        let present = self.discover();
        let present_ids: HashSet<DeviceId> = present.iter().map(Device::id).collect();
        let before = self.len();

        let departed: Vec<DeviceId> = self
            .lock_entries()
            .keys()
            .filter(|id| !present_ids.contains(id))
            .copied()
            .collect();
        for id in departed {
            if let Some(info) = self.detach(id) {
                self.sink.push(Event::DeviceDeparted(info));
            }
        }

        for device in present {
            let id = device.id;
            if self.lock_entries().contains_key(&id) {
                continue;
            }
            if let Err(e) = self.attach(device) {
                warn!("{}", e);
                continue;
            }
            if self.options.auto_start
                && let Err(e) = self.start(id)
            {
                warn!("{}", e);
            }
            self.sink.push(Event::DeviceArrived(DeviceInfo { id }));
        }

        let after = self.len();
        if before != after {
            info!("touch devices: {} -> {}", before, after);
        }
    }

    pub fn state(&self, id: DeviceId) -> Option<DeviceState> {
        self.lock_entries().get(&id).map(|e| e.device.state)
    }

    /// Attached devices, ordered by id.
    pub fn attached(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = self
            .lock_entries()
            .values()
            .map(|e| e.device.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn teardown(&self, entry: Entry) -> DeviceInfo {
        let Entry { mut device, route } = entry;

        self.framework.unregister_frames(device.handle);
        route.close();
        if device.state == DeviceState::Started {
            self.framework.stop(device.handle);
        }
        device.state = DeviceState::Stopped;
        debug!("device {} stopped", device.id);

        device.state = DeviceState::Removed;
        device.info()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<DeviceId, Entry>> {
        // Entries stay consistent even if a holder panicked mid-operation.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeviceChangeListener for DeviceRegistry {
    fn devices_changed(&self, side: NotificationSide) {
        debug!("device {} notification, reconciling", side);
        self.reconcile();
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::TouchState;
    use crate::event::EventType;
    use crate::queue;
    use crate::testing::{Call, FakeFramework, contact, frame};

    fn registry(fw: &Arc<FakeFramework>) -> (DeviceRegistry, crate::queue::EventReceiver) {
        let (tx, rx) = queue::unbounded();
        (
            DeviceRegistry::new(fw.clone(), tx, RegistryOptions::default()),
            rx,
        )
    }

    #[test]
    fn test_discover_has_no_side_effects() {
        let fw = FakeFramework::with_devices(&[1, 2]);
        let (reg, _rx) = registry(&fw);

        let found = reg.discover();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|d| d.state() == DeviceState::Discovered));
        assert!(reg.is_empty());
        assert!(fw.calls().iter().all(|c| !matches!(c, Call::Register(_))));

        drop(found);
        assert_eq!(fw.outstanding_retains(), 0);
    }

    #[test]
    fn test_attach_start_detach_order() {
        let fw = FakeFramework::with_devices(&[7]);
        let (reg, _rx) = registry(&fw);

        let device = reg.discover().pop().unwrap();
        let id = device.id();
        reg.attach(device).unwrap();
        assert_eq!(reg.state(id), Some(DeviceState::Registered));
        reg.start(id).unwrap();
        assert_eq!(reg.state(id), Some(DeviceState::Started));

        let info = reg.detach(id).unwrap();
        assert_eq!(info.id, id);
        assert_eq!(reg.state(id), None);

        let h = NativeHandle(7);
        assert_eq!(
            fw.calls(),
            vec![
                Call::List,
                Call::Register(h),
                Call::Start(h),
                Call::Unregister(h),
                Call::Stop(h),
                Call::Release(h),
            ]
        );
        assert_eq!(fw.outstanding_retains(), 0);
    }

    #[test]
    fn test_attach_twice_fails() {
        let fw = FakeFramework::with_devices(&[3]);
        let (reg, _rx) = registry(&fw);

        reg.attach(reg.discover().pop().unwrap()).unwrap();
        let again = reg.discover().pop().unwrap();
        let id = again.id();
        assert_eq!(reg.attach(again), Err(AttachError::AlreadyAttached(id)));
        // The duplicate handle was released, the attached one was not
        assert_eq!(fw.outstanding_retains(), 1);
    }

    #[test]
    fn test_failed_registration_releases_handle() {
        let fw = FakeFramework::with_devices(&[4]);
        fw.fail_register(NativeHandle(4));
        let (reg, _rx) = registry(&fw);

        let err = reg.attach(reg.discover().pop().unwrap()).unwrap_err();
        assert!(matches!(err, AttachError::Registration { .. }));
        assert!(reg.is_empty());
        assert_eq!(fw.outstanding_retains(), 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let fw = FakeFramework::with_devices(&[5]);
        let (reg, rx) = registry(&fw);

        let device = reg.discover().pop().unwrap();
        let id = device.id();
        reg.attach(device).unwrap();
        reg.start(id).unwrap();
        reg.start(id).unwrap();

        let starts = fw
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Start(_)))
            .count();
        let registers = fw
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Register(_)))
            .count();
        assert_eq!((starts, registers), (1, 1));

        fw.deliver(NativeHandle(5), frame(1, vec![contact(1, TouchState::MakeTouch)]));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_start_unknown_device() {
        let fw = FakeFramework::with_devices(&[]);
        let (reg, _rx) = registry(&fw);
        let id = DeviceId::new(99);
        assert_eq!(reg.start(id), Err(StartError::NotAttached(id)));
    }

    #[test]
    fn test_frames_route_to_device_tracker() {
        let fw = FakeFramework::with_devices(&[1, 2]);
        let (reg, rx) = registry(&fw);
        reg.reconcile();
        let _ = rx.try_iter().count();

        fw.deliver(NativeHandle(1), frame(1, vec![contact(1, TouchState::MakeTouch)]));
        fw.deliver(NativeHandle(2), frame(1, vec![contact(1, TouchState::MakeTouch)]));
        fw.deliver(NativeHandle(1), frame(2, vec![]));

        let events: Vec<(EventType, Option<DeviceId>)> =
            rx.try_iter().map(|e| (e.event_type(), e.device())).collect();
        assert_eq!(
            events,
            vec![
                (EventType::TouchBegin, Some(NativeHandle(1).id())),
                (EventType::TouchBegin, Some(NativeHandle(2).id())),
                (EventType::TouchEnd, Some(NativeHandle(1).id())),
            ]
        );
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let fw = FakeFramework::with_devices(&[1]);
        let (reg, rx) = registry(&fw);
        reg.reconcile();
        let _ = rx.try_iter().count();

        fw.deliver_decoded(NativeHandle(1), Err(DecodeError::NegativeCount(-1)));
        assert_eq!(rx.try_iter().count(), 0);

        fw.deliver(NativeHandle(1), frame(1, vec![contact(1, TouchState::Touching)]));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_no_delivery_after_detach() {
        let fw = FakeFramework::with_devices(&[1]);
        let (reg, rx) = registry(&fw);
        reg.reconcile();
        let route = fw.route(NativeHandle(1)).unwrap();
        reg.detach(NativeHandle(1).id());
        let _ = rx.try_iter().count();

        // A frame that raced the unregistration must not reach the tracker
        route.deliver(Ok(frame(1, vec![contact(1, TouchState::MakeTouch)])));
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_detach_ends_live_fingers() {
        let fw = FakeFramework::with_devices(&[1]);
        let (reg, rx) = registry(&fw);
        reg.reconcile();
        fw.deliver(
            NativeHandle(1),
            frame(1, vec![contact(1, TouchState::Touching), contact(2, TouchState::Touching)]),
        );
        let _ = rx.try_iter().count();

        reg.detach(NativeHandle(1).id());
        let ends: Vec<_> = rx.try_iter().map(|e| e.event_type()).collect();
        assert_eq!(ends, vec![EventType::TouchEnd; 2]);
    }

    #[test]
    fn test_reconcile_diffs_devices() {
        let fw = FakeFramework::with_devices(&[1, 2]);
        let (reg, rx) = registry(&fw);

        reg.reconcile();
        let arrived: Vec<_> = rx.try_iter().map(|e| e.event_type()).collect();
        assert_eq!(arrived, vec![EventType::DeviceArrived; 2]);
        assert_eq!(reg.state(NativeHandle(1).id()), Some(DeviceState::Started));

        fw.set_devices(&[2, 3]);
        reg.reconcile();
        let changes: Vec<_> = rx.try_iter().map(|e| (e.event_type(), e.device())).collect();
        assert_eq!(
            changes,
            vec![
                (EventType::DeviceDeparted, Some(NativeHandle(1).id())),
                (EventType::DeviceArrived, Some(NativeHandle(3).id())),
            ]
        );
        assert_eq!(
            reg.attached(),
            vec![
                DeviceInfo {
                    id: NativeHandle(2).id()
                },
                DeviceInfo {
                    id: NativeHandle(3).id()
                },
            ]
        );
        // Only attached devices still hold a retain
        assert_eq!(fw.outstanding_retains(), 2);
    }

    #[test]
    fn test_reconcile_without_auto_start() {
        let fw = FakeFramework::with_devices(&[1]);
        let (tx, _rx) = queue::unbounded();
        let reg = DeviceRegistry::new(
            fw.clone(),
            tx,
            RegistryOptions {
                auto_start: false,
                ..Default::default()
            },
        );
        reg.reconcile();
        assert_eq!(reg.state(NativeHandle(1).id()), Some(DeviceState::Registered));
    }

    #[test]
    fn test_drop_detaches_everything() {
        let fw = FakeFramework::with_devices(&[1, 2, 3]);
        {
            let (reg, _rx) = registry(&fw);
            reg.reconcile();
            assert_eq!(reg.len(), 3);
        }
        assert_eq!(fw.outstanding_retains(), 0);
        assert!(fw.routes_empty());
    }

    #[test]
    #[should_panic(expected = "still registered")]
    fn test_releasing_registered_device_panics() {
        let fw = FakeFramework::with_devices(&[1]);
        let mut device = Device::discovered(NativeHandle(1), fw.clone());
        device.state = DeviceState::Registered;
        drop(device);
    }
}
