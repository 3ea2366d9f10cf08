//! MultitouchSupport contact frame delivery.

use super::ffi;
use crate::contact::{RawFinger, decode_raw};
use crate::device::{FrameRoute, NativeHandle, TouchFramework};
use std::ffi::{c_double, c_int};
use std::sync::{Arc, RwLock};

/// Frame routes by device pointer. The framework callback carries no
/// user data, so the device pointer is the only way back to a route.
static ROUTES: RwLock<Vec<(usize, Arc<FrameRoute>)>> = RwLock::new(Vec::new());

fn route_for(device: ffi::MTDeviceRef) -> Option<Arc<FrameRoute>> {
    let routes = ROUTES.read().ok()?;
    routes
        .iter()
        .find(|(key, _)| *key == device as usize)
        .map(|(_, route)| route.clone())
}

/// The contact frame callback registered with every device.
unsafe extern "C" fn contact_frame_callback(
    device: ffi::MTDeviceRef,
    data: *const RawFinger,
    count: c_int,
    timestamp: c_double,
    frame: c_int,
) -> c_int {
    if let Some(route) = route_for(device) {
        let decoded = unsafe { decode_raw(data, count, frame, timestamp) };
        route.deliver(decoded);
    }
    0
}

/// The MultitouchSupport private framework.
pub(crate) struct Multitouch;

impl TouchFramework for Multitouch {
    fn device_list(&self) -> Vec<NativeHandle> {
        unsafe {
            let list = ffi::MTDeviceCreateList();
            if list.is_null() {
                return Vec::new();
            }
            let count = ffi::CFArrayGetCount(list);
            let handles = (0..count)
                .map(|index| {
                    let device = ffi::CFArrayGetValueAtIndex(list, index);
                    // The array's reference dies with the array
                    ffi::CFRetain(device);
                    NativeHandle::from_ptr(device)
                })
                .collect();
            ffi::CFRelease(list);
            handles
        }
    }

    fn register_frames(
        &self,
        handle: NativeHandle,
        route: Arc<FrameRoute>,
    ) -> std::result::Result<(), String> {
        {
            let mut routes = ROUTES
                .write()
                .map_err(|_| "frame route table poisoned".to_string())?;
            let key = handle.as_ptr() as usize;
            routes.retain(|(existing, _)| *existing != key);
            routes.push((key, route));
        }
        unsafe { ffi::MTRegisterContactFrameCallback(handle.as_ptr(), contact_frame_callback) };
        Ok(())
    }

    fn unregister_frames(&self, handle: NativeHandle) {
        unsafe { ffi::MTUnregisterContactFrameCallback(handle.as_ptr(), contact_frame_callback) };
        let key = handle.as_ptr() as usize;
        let mut routes = ROUTES
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        routes.retain(|(existing, _)| *existing != key);
    }

    fn start(&self, handle: NativeHandle) -> std::result::Result<(), String> {
        unsafe { ffi::MTDeviceStart(handle.as_ptr(), 0) };
        Ok(())
    }

    fn stop(&self, handle: NativeHandle) {
        unsafe { ffi::MTDeviceStop(handle.as_ptr()) };
    }

    fn release(&self, handle: NativeHandle) {
        unsafe { ffi::CFRelease(handle.as_ptr()) };
    }
}
