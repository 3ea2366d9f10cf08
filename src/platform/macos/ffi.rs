//! Declarations for the C APIs not covered by the objc2 framework crates.

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use crate::contact::RawFinger;
use std::ffi::{CStr, c_char, c_double, c_int, c_void};

pub type CFTypeRef = *const c_void;
pub type CFArrayRef = *const c_void;
pub type CFIndex = isize;
pub type CFMutableDictionaryRef = *mut c_void;
pub type CFRunLoopSourceRef = *mut c_void;

pub type MTDeviceRef = *mut c_void;
pub type MTContactCallbackFunction = unsafe extern "C" fn(
    device: MTDeviceRef,
    data: *const RawFinger,
    count: c_int,
    timestamp: c_double,
    frame: c_int,
) -> c_int;

pub type mach_port_t = u32;
pub type io_object_t = mach_port_t;
pub type io_iterator_t = io_object_t;
pub type kern_return_t = c_int;
pub type IONotificationPortRef = *mut c_void;
pub type IOServiceMatchingCallback =
    unsafe extern "C" fn(refcon: *mut c_void, iterator: io_iterator_t);

pub const KERN_SUCCESS: kern_return_t = 0;
pub const IO_MAIN_PORT_DEFAULT: mach_port_t = 0;
pub const IO_FIRST_MATCH_NOTIFICATION: &CStr = c"IOServiceFirstMatch";
pub const IO_TERMINATED_NOTIFICATION: &CStr = c"IOServiceTerminate";

#[link(name = "CoreFoundation", kind = "framework")]
unsafe extern "C" {
    pub fn CFRetain(cf: CFTypeRef) -> CFTypeRef;
    pub fn CFRelease(cf: CFTypeRef);
    pub fn CFArrayGetCount(array: CFArrayRef) -> CFIndex;
    pub fn CFArrayGetValueAtIndex(array: CFArrayRef, index: CFIndex) -> *const c_void;
}

#[link(name = "IOKit", kind = "framework")]
unsafe extern "C" {
    pub fn IONotificationPortCreate(main_port: mach_port_t) -> IONotificationPortRef;
    pub fn IONotificationPortDestroy(notify: IONotificationPortRef);
    pub fn IONotificationPortGetRunLoopSource(notify: IONotificationPortRef) -> CFRunLoopSourceRef;
    pub fn IOServiceMatching(name: *const c_char) -> CFMutableDictionaryRef;
    pub fn IOServiceAddMatchingNotification(
        notify_port: IONotificationPortRef,
        notification_type: *const c_char,
        matching: CFMutableDictionaryRef,
        callback: IOServiceMatchingCallback,
        refcon: *mut c_void,
        notification: *mut io_iterator_t,
    ) -> kern_return_t;
    pub fn IOIteratorNext(iterator: io_iterator_t) -> io_object_t;
    pub fn IOObjectRelease(object: io_object_t) -> kern_return_t;
}

// Private framework; build.rs adds its directory to the framework search path.
#[link(name = "MultitouchSupport", kind = "framework")]
unsafe extern "C" {
    pub fn MTDeviceCreateList() -> CFArrayRef;
    pub fn MTRegisterContactFrameCallback(
        device: MTDeviceRef,
        callback: MTContactCallbackFunction,
    );
    pub fn MTUnregisterContactFrameCallback(
        device: MTDeviceRef,
        callback: MTContactCallbackFunction,
    );
    pub fn MTDeviceStart(device: MTDeviceRef, mode: c_int);
    pub fn MTDeviceStop(device: MTDeviceRef);
}
