//! Monitor wiring and the background run-loop thread.

use crate::config::MonitorConfig;
use crate::device::{DeviceInfo, DeviceRegistry, RegistryOptions, TouchFramework};
use crate::error::{Error, Result};
use crate::hotplug::{HotplugNotifier, NotificationHandles, NotificationSource};
use crate::platform::{self, RunLoop};
use crate::queue::{self, EventReceiver, EventSender};
use crate::tap::{EventTapSession, PassThroughHandler, TapHandler, TapInstaller};
use crate::tracker::TrackerOptions;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};

/// The native services a session is built on.
#[derive(Clone)]
pub struct Backends {
    pub touch: Arc<dyn TouchFramework>,
    pub notifications: Arc<dyn NotificationSource>,
    pub tap: Arc<dyn TapInstaller>,
}

impl Backends {
    /// The host platform's services.
    ///
    /// Fails with [`Error::NotSupported`] off macOS.
    pub fn native() -> Result<Self> {
        platform::backends()
    }
}

/// Registry, hotplug notifications and the optional event tap, wired to
/// one dispatch queue.
///
/// Must be opened on the thread whose run loop will deliver the hotplug
/// and tap callbacks.
pub struct MonitorSession {
    registry: Option<Arc<DeviceRegistry>>,
    notifications: Option<NotificationHandles>,
    tap: Option<EventTapSession>,
}

impl MonitorSession {
    /// Wire everything up. On failure the pieces already built are torn
    /// down before the error is returned.
    pub fn open(
        config: &MonitorConfig,
        backends: &Backends,
        sink: EventSender,
        handler: Arc<dyn TapHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(DeviceRegistry::new(
            backends.touch.clone(),
            sink.clone(),
            RegistryOptions {
                auto_start: config.auto_start,
                tracker: TrackerOptions {
                    suppress_unchanged: config.suppress_unchanged_updates,
                },
            },
        ));
        let mut session = Self {
            registry: Some(registry.clone()),
            notifications: None,
            tap: None,
        };

        let notifier = HotplugNotifier::new(backends.notifications.clone(), registry);
        session.notifications = Some(notifier.register(&config.device_class)?);

        if let Some(tap) = &config.tap {
            session.tap = Some(EventTapSession::install(
                backends.tap.as_ref(),
                tap,
                handler,
                sink,
            )?);
        }

        info!(
            "monitor session open: {} touch device(s), tap {}",
            session.attached().len(),
            if session.tap.is_some() { "on" } else { "off" }
        );
        Ok(session)
    }

    /// Attached touch devices, ordered by id.
    pub fn attached(&self) -> Vec<DeviceInfo> {
        self.registry
            .as_ref()
            .map(|registry| registry.attached())
            .unwrap_or_default()
    }

    pub fn registry(&self) -> Option<&DeviceRegistry> {
        self.registry.as_deref()
    }

    pub fn tap(&self) -> Option<&EventTapSession> {
        self.tap.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.registry.is_some()
    }

    /// Tear down notifications, then devices, then the tap.
    ///
    /// Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut notifications) = self.notifications.take() {
            notifications.teardown();
        }
        if let Some(registry) = self.registry.take() {
            let detached = registry.detach_all();
            debug!("detached {} touch device(s)", detached.len());
        }
        if let Some(mut tap) = self.tap.take() {
            tap.uninstall();
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builder for a monitor running on its own thread.
pub struct Monitor {
    config: MonitorConfig,
    handler: Arc<dyn TapHandler>,
    backends: Option<Backends>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            handler: Arc::new(PassThroughHandler),
            backends: None,
        }
    }

    /// Decide intercepted events with `handler`. Without one every event
    /// passes through.
    pub fn with_tap_handler<H: TapHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Use these services instead of the host platform's.
    pub fn with_backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Start monitoring in a background thread (non-blocking).
    ///
    /// Returns once the session is open, or with the error that kept it
    /// from opening.
    pub fn start(self) -> Result<(MonitorHandle, EventReceiver)> {
        self.config.validate()?;
        let (tx, rx) = queue::channel(self.config.queue_capacity);
        let handle = self.spawn(tx)?;
        Ok((handle, rx))
    }

    /// Start monitoring with events delivered through a tokio channel.
    #[cfg(feature = "tokio")]
    pub fn start_async(
        self,
    ) -> Result<(MonitorHandle, tokio::sync::mpsc::Receiver<crate::event::Event>)> {
        self.config.validate()?;
        let capacity = self
            .config
            .queue_capacity
            .unwrap_or(crate::config::DEFAULT_QUEUE_CAPACITY);
        let (tx, rx) = queue::async_channel(capacity);
        let handle = self.spawn(tx)?;
        Ok((handle, rx))
    }

    fn spawn(self, sink: EventSender) -> Result<MonitorHandle> {
        let Monitor {
            config,
            handler,
            backends,
        } = self;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<RunLoop>>(1);

        let thread = thread::Builder::new()
            .name("touchwatch-runloop".into())
            .spawn(move || {
                let opened = (|| -> Result<(RunLoop, MonitorSession)> {
                    let backends = match backends {
                        Some(backends) => backends,
                        None => Backends::native()?,
                    };
                    let run_loop = RunLoop::current()?;
                    let session = MonitorSession::open(&config, &backends, sink, handler)?;
                    Ok((run_loop, session))
                })();

                match opened {
                    Ok((run_loop, mut session)) => {
                        let _ = ready_tx.send(Ok(run_loop.clone()));
                        run_loop.run_while(&thread_running);
                        session.close();
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
                thread_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| Error::ThreadError(format!("failed to spawn run loop thread: {}", e)))?;

        let run_loop = match ready_rx.recv() {
            Ok(Ok(run_loop)) => run_loop,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::ThreadError(
                    "run loop thread exited during startup".into(),
                ));
            }
        };

        Ok(MonitorHandle {
            running,
            run_loop,
            thread: Some(thread),
        })
    }
}

/// Handle to a running monitor. Dropping it stops the monitor.
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    run_loop: RunLoop,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the run loop, close the session and join the thread.
    pub fn stop(&mut self) -> Result<()> {
        let thread = self.thread.take().ok_or(Error::NotRunning)?;
        self.running.store(false, Ordering::SeqCst);
        self.run_loop.wake();
        thread
            .join()
            .map_err(|_| Error::ThreadError("failed to join run loop thread".into()))
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop();
        }
    }
}

/// Start a monitor with `config` and the host platform's services.
pub fn start(config: MonitorConfig) -> Result<(MonitorHandle, EventReceiver)> {
    Monitor::new(config).start()
}
