//! Error types for touch monitoring.

use crate::device::DeviceId;
use crate::hotplug::NotificationSide;
use thiserror::Error;

/// Result type alias for touchwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the monitor and its components.
#[derive(Debug, Error)]
pub enum Error {
    /// Monitor is not running.
    #[error("monitor is not running")]
    NotRunning,

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A device could not be attached.
    #[error(transparent)]
    Attach(#[from] AttachError),

    /// A device could not be started.
    #[error(transparent)]
    Start(#[from] StartError),

    /// Hotplug notifications could not be registered.
    #[error(transparent)]
    Register(#[from] RegisterError),

    /// The event tap could not be installed.
    #[error(transparent)]
    Install(#[from] InstallError),

    /// Platform-specific error.
    #[error("platform error: {0}")]
    Platform(String),

    /// Thread-related error.
    #[error("thread error: {0}")]
    ThreadError(String),

    /// The requested feature is not supported on this platform.
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// A raw contact frame that could not be decoded.
///
/// The offending frame is dropped; decoding never fails the callback path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The framework reported a negative contact count.
    #[error("negative contact count {0}")]
    NegativeCount(i32),

    /// Contacts were reported but the buffer pointer was null.
    #[error("contact buffer is null but {0} contacts were reported")]
    NullBuffer(i32),

    /// A record carried a state value outside the eight known states.
    #[error("contact {index} has unknown touch state {value}")]
    UnknownState { index: usize, value: i32 },
}

/// Failure to register a device's frame callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The device already has a registered callback.
    #[error("device {0} is already attached")]
    AlreadyAttached(DeviceId),

    /// The framework refused the registration.
    #[error("failed to register frame callback for device {device}: {reason}")]
    Registration { device: DeviceId, reason: String },
}

/// Failure to begin frame delivery for a device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The device is not attached to the registry.
    #[error("device {0} is not attached")]
    NotAttached(DeviceId),

    /// The framework refused to start the device.
    #[error("failed to start device {device}: {reason}")]
    Framework { device: DeviceId, reason: String },
}

/// Failure to set up hotplug notifications.
///
/// Any half-registered state has been released by the time this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    /// The notification port could not be created.
    #[error("failed to create notification port: {0}")]
    PortCreation(String),

    /// The matching criteria for the device class could not be created.
    #[error("failed to create matching criteria for {0:?}")]
    Matching(String),

    /// The OS rejected one side of the notification.
    #[error("failed to add {side} notification (code {code})")]
    Notification { side: NotificationSide, code: i32 },
}

/// Failure to install the event tap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    /// The OS refused to create the tap, usually for lack of Accessibility access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The tap could not be scheduled on a run loop.
    #[error("failed to create run loop source: {0}")]
    RunLoopSource(String),
}
