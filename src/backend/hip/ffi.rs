//! HIP runtime bindings
//!
//! Only the entry points the allocator needs. Linked against `amdhip64`
//! by build.rs when the `rocm` feature is enabled.

use std::ffi::{c_char, c_void, CStr};

#[link(name = "amdhip64")]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: i32) -> i32;
    pub fn hipDeviceSynchronize() -> i32;
    pub fn hipGetErrorString(error: i32) -> *const c_char;
}

pub const HIP_SUCCESS: i32 = 0;
pub const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;

/// Readable message for a HIP status code
pub fn error_string(code: i32) -> String {
    // SAFETY: hipGetErrorString returns a static NUL-terminated string or null.
    unsafe {
        let msg = hipGetErrorString(code);
        if msg.is_null() {
            format!("unknown HIP error {}", code)
        } else {
            format!("{} (code {})", CStr::from_ptr(msg).to_string_lossy(), code)
        }
    }
}
