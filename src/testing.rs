//! In-memory stand-ins for the native frameworks, shared by unit tests.

use crate::config::TapConfig;
use crate::contact::{Contact, Frame, Point, RawFinger, TouchState, Vector};
use crate::device::{FrameRoute, NativeHandle, TouchFramework};
use crate::error::{DecodeError, InstallError, RegisterError};
use crate::hotplug::{
    DeviceChangeListener, IteratorToken, NotificationSide, NotificationSource, NotifyContext,
    ObjectToken, PortToken,
};
use crate::tap::{Decision, TapContext, TapDisableReason, TapEvent, TapInstaller, TapPort};
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn raw_finger(finger_id: i32, state: TouchState) -> RawFinger {
    RawFinger {
        frame: 1,
        timestamp: 0.0,
        path_index: finger_id,
        state: state.raw(),
        finger_id,
        hand_id: 1,
        normalized: Vector {
            position: Point { x: 0.5, y: 0.5 },
            velocity: Point::default(),
        },
        z_total: 0.5,
        major_axis: 8.0,
        minor_axis: 6.0,
        ..Default::default()
    }
}

pub fn contact(finger_id: i32, state: TouchState) -> Contact {
    Contact::from_raw(&raw_finger(finger_id, state)).unwrap()
}

pub fn frame(number: i32, mut contacts: Vec<Contact>) -> Frame {
    for contact in &mut contacts {
        contact.frame = number;
    }
    Frame {
        number,
        timestamp: f64::from(number) * 0.008,
        contacts,
    }
}

/// A call made into [`FakeFramework`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    List,
    Register(NativeHandle),
    Unregister(NativeHandle),
    Start(NativeHandle),
    Stop(NativeHandle),
    Release(NativeHandle),
}

#[derive(Default)]
struct FrameworkState {
    devices: Vec<usize>,
    calls: Vec<Call>,
    retains: HashMap<usize, i64>,
    routes: HashMap<usize, Arc<FrameRoute>>,
    failing: HashSet<usize>,
}

/// Multitouch framework whose devices are plain integers.
#[derive(Default)]
pub struct FakeFramework {
    state: Mutex<FrameworkState>,
}

impl FakeFramework {
    pub fn with_devices(devices: &[usize]) -> Arc<Self> {
        let fake = Self::default();
        fake.set_devices(devices);
        Arc::new(fake)
    }

    pub fn handle(n: usize) -> NativeHandle {
        NativeHandle::from_ptr(n as *const c_void)
    }

    pub fn set_devices(&self, devices: &[usize]) {
        self.state.lock().unwrap().devices = devices.to_vec();
    }

    pub fn fail_register(&self, handle: NativeHandle) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(handle.as_ptr() as usize);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Retains handed out by `device_list` and not yet released.
    pub fn outstanding_retains(&self) -> i64 {
        self.state.lock().unwrap().retains.values().sum()
    }

    pub fn route(&self, handle: NativeHandle) -> Option<Arc<FrameRoute>> {
        self.state
            .lock()
            .unwrap()
            .routes
            .get(&(handle.as_ptr() as usize))
            .cloned()
    }

    pub fn routes_empty(&self) -> bool {
        self.state.lock().unwrap().routes.is_empty()
    }

    /// Deliver a frame the way the framework callback would.
    pub fn deliver(&self, handle: NativeHandle, frame: Frame) {
        self.deliver_decoded(handle, Ok(frame));
    }

    pub fn deliver_decoded(&self, handle: NativeHandle, decoded: Result<Frame, DecodeError>) {
        if let Some(route) = self.route(handle) {
            route.deliver(decoded);
        }
    }
}

impl TouchFramework for FakeFramework {
    fn device_list(&self) -> Vec<NativeHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::List);
        let devices = state.devices.clone();
        for &device in &devices {
            *state.retains.entry(device).or_default() += 1;
        }
        devices.into_iter().map(Self::handle).collect()
    }

    fn register_frames(&self, handle: NativeHandle, route: Arc<FrameRoute>) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        let key = handle.as_ptr() as usize;
        if state.failing.contains(&key) {
            return Err("registration refused".into());
        }
        state.calls.push(Call::Register(handle));
        state.routes.insert(key, route);
        Ok(())
    }

    fn unregister_frames(&self, handle: NativeHandle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Unregister(handle));
        state.routes.remove(&(handle.as_ptr() as usize));
    }

    fn start(&self, handle: NativeHandle) -> Result<(), String> {
        self.state.lock().unwrap().calls.push(Call::Start(handle));
        Ok(())
    }

    fn stop(&self, handle: NativeHandle) {
        self.state.lock().unwrap().calls.push(Call::Stop(handle));
    }

    fn release(&self, handle: NativeHandle) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Release(handle));
        *state.retains.entry(handle.as_ptr() as usize).or_default() -= 1;
    }
}

struct FakeIterator {
    token: u32,
    side: NotificationSide,
    pending: VecDeque<u32>,
    context: Arc<NotifyContext>,
    releases: usize,
}

#[derive(Default)]
struct NotifyState {
    present: usize,
    fail_port: bool,
    fail_side: Option<NotificationSide>,
    ports_destroyed: usize,
    iterators: Vec<FakeIterator>,
    next_token: u32,
    next_object: u32,
    outstanding_objects: i64,
}

impl NotifyState {
    fn push_objects(&mut self, index: usize, count: usize) {
        for _ in 0..count {
            self.next_object += 1;
            let object = self.next_object;
            self.iterators[index].pending.push_back(object);
            self.outstanding_objects += 1;
        }
    }
}

/// IOKit-like notification service driven by the test.
#[derive(Default)]
pub struct FakeNotifications {
    state: Mutex<NotifyState>,
}

impl FakeNotifications {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Services already matching when the arrival side is armed.
    pub fn set_present(&self, count: usize) {
        self.state.lock().unwrap().present = count;
    }

    pub fn fail_port(&self) {
        self.state.lock().unwrap().fail_port = true;
    }

    pub fn fail_side(&self, side: NotificationSide) {
        self.state.lock().unwrap().fail_side = Some(side);
    }

    /// Release count per armed iterator, in arming order.
    pub fn iterator_releases(&self) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state.iterators.iter().map(|it| it.releases).collect()
    }

    pub fn ports_destroyed(&self) -> usize {
        self.state.lock().unwrap().ports_destroyed
    }

    pub fn outstanding_objects(&self) -> i64 {
        self.state.lock().unwrap().outstanding_objects
    }

    pub fn context(&self, side: NotificationSide) -> Option<Arc<NotifyContext>> {
        let state = self.state.lock().unwrap();
        state
            .iterators
            .iter()
            .rev()
            .find(|it| it.side == side)
            .map(|it| it.context.clone())
    }

    /// Queue `count` matching services on `side` and deliver the notification.
    pub fn fire(&self, side: NotificationSide, count: usize) {
        let target = {
            let mut state = self.state.lock().unwrap();
            let Some(index) = state.iterators.iter().rposition(|it| it.side == side) else {
                return;
            };
            state.push_objects(index, count);
            let it = &state.iterators[index];
            (it.token, it.context.clone())
        };
        let (token, context) = target;
        context.notify(IteratorToken(token));
    }
}

impl NotificationSource for FakeNotifications {
    fn create_port(&self) -> Result<PortToken, RegisterError> {
        let state = self.state.lock().unwrap();
        if state.fail_port {
            return Err(RegisterError::PortCreation("port refused".into()));
        }
        Ok(PortToken(1))
    }

    fn add_notification(
        &self,
        _port: PortToken,
        side: NotificationSide,
        _class: &str,
        context: &Arc<NotifyContext>,
    ) -> Result<IteratorToken, RegisterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_side == Some(side) {
            return Err(RegisterError::Notification {
                side,
                code: 0xE00002BCu32 as i32,
            });
        }

        state.next_token += 1;
        let token = state.next_token;
        state.iterators.push(FakeIterator {
            token,
            side,
            pending: VecDeque::new(),
            context: context.clone(),
            releases: 0,
        });
        if side == NotificationSide::Arrival {
            let index = state.iterators.len() - 1;
            let present = state.present;
            state.push_objects(index, present);
        }
        Ok(IteratorToken(token))
    }

    fn next_object(&self, iterator: IteratorToken) -> Option<ObjectToken> {
        let mut state = self.state.lock().unwrap();
        state
            .iterators
            .iter_mut()
            .find(|it| it.token == iterator.0)?
            .pending
            .pop_front()
            .map(ObjectToken)
    }

    fn release_object(&self, _object: ObjectToken) {
        self.state.lock().unwrap().outstanding_objects -= 1;
    }

    fn release_iterator(&self, iterator: IteratorToken) {
        let mut state = self.state.lock().unwrap();
        if let Some(it) = state.iterators.iter_mut().find(|it| it.token == iterator.0) {
            it.releases += 1;
        }
    }

    fn destroy_port(&self, _port: PortToken) {
        self.state.lock().unwrap().ports_destroyed += 1;
    }
}

/// Records every "devices changed" signal.
#[derive(Default)]
pub struct RecordingListener {
    sides: Mutex<Vec<NotificationSide>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sides(&self) -> Vec<NotificationSide> {
        self.sides.lock().unwrap().clone()
    }
}

impl DeviceChangeListener for RecordingListener {
    fn devices_changed(&self, side: NotificationSide) {
        self.sides.lock().unwrap().push(side);
    }
}

#[derive(Default)]
struct TapState {
    enabled: AtomicBool,
    denied: AtomicBool,
    invalidations: AtomicUsize,
    context: Mutex<Option<Arc<TapContext>>>,
    downstream: Mutex<Vec<TapEvent>>,
}

/// Event pipeline with one tap slot and an observer behind it.
#[derive(Default)]
pub struct FakeTapInstaller {
    state: Arc<TapState>,
}

impl FakeTapInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self) {
        self.state.denied.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.state.invalidations.load(Ordering::SeqCst)
    }

    /// Events that made it past the tap.
    pub fn downstream(&self) -> Vec<TapEvent> {
        self.state.downstream.lock().unwrap().clone()
    }

    /// Send an event down the pipeline.
    pub fn inject(&self, event: TapEvent) {
        let context = self.state.context.lock().unwrap().clone();
        let delivered = match context {
            Some(context) if self.is_enabled() => match context.on_event(event.clone()) {
                Decision::PassThrough => Some(event),
                Decision::Replace(replacement) => Some(replacement),
                Decision::Suppress => None,
            },
            _ => Some(event),
        };
        if let Some(event) = delivered {
            self.state.downstream.lock().unwrap().push(event);
        }
    }

    /// Switch the tap off the way the window server does.
    pub fn disable(&self, reason: TapDisableReason) {
        self.state.enabled.store(false, Ordering::SeqCst);
        let context = self.state.context.lock().unwrap().clone();
        if let Some(context) = context {
            context.on_disabled(reason);
        }
    }
}

impl TapInstaller for FakeTapInstaller {
    fn create_tap(
        &self,
        _config: &TapConfig,
        context: &Arc<TapContext>,
    ) -> Result<Box<dyn TapPort>, InstallError> {
        if self.state.denied.load(Ordering::SeqCst) {
            return Err(InstallError::PermissionDenied(
                "accessibility access not granted".into(),
            ));
        }
        *self.state.context.lock().unwrap() = Some(context.clone());
        Ok(Box::new(FakeTapPort {
            state: self.state.clone(),
        }))
    }
}

struct FakeTapPort {
    state: Arc<TapState>,
}

impl TapPort for FakeTapPort {
    fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    fn invalidate(&mut self) {
        self.state.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
