//! HIP runtime allocator
//!
//! Device memory comes from `hipMalloc`. Transfers are blocking `hipMemcpy`
//! calls on the default stream; device to host copies first wait for all
//! outstanding device work so results written by earlier kernel launches
//! are visible.

mod ffi;

use std::ffi::c_void;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{DeviceAllocator, DeviceHandle};
use crate::error::{ResourceError, ResourceResult};

/// Allocator bound to one HIP device
#[derive(Debug, Clone)]
pub struct HipAllocator {
    device_id: i32,
}

impl HipAllocator {
    /// Whether the HIP runtime loads and reports at least one device
    ///
    /// Checked once per process.
    pub fn gpu_available() -> bool {
        static INIT: Once = Once::new();
        static AVAILABLE: AtomicBool = AtomicBool::new(false);

        INIT.call_once(|| {
            // SAFETY: plain status-returning runtime queries.
            let available = unsafe {
                let mut count: i32 = 0;
                ffi::hipInit(0) == ffi::HIP_SUCCESS
                    && ffi::hipGetDeviceCount(&mut count) == ffi::HIP_SUCCESS
                    && count > 0
            };
            tracing::debug!("HIP device available: {}", available);
            AVAILABLE.store(available, Ordering::Release);
        });

        AVAILABLE.load(Ordering::Acquire)
    }

    /// Select `device_id` for all subsequent allocations on this thread
    pub fn new(device_id: i32) -> ResourceResult<Self> {
        if !Self::gpu_available() {
            return Err(ResourceError::DeviceAllocationFailed {
                bytes: 0,
                reason: "no HIP device available".to_string(),
            });
        }
        // SAFETY: status-returning runtime call.
        let result = unsafe { ffi::hipSetDevice(device_id) };
        if result != ffi::HIP_SUCCESS {
            return Err(ResourceError::DeviceAllocationFailed {
                bytes: 0,
                reason: format!("hipSetDevice({}) failed: {}", device_id, ffi::error_string(result)),
            });
        }
        Ok(HipAllocator { device_id })
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    fn synchronize(&self) -> ResourceResult<()> {
        // SAFETY: status-returning runtime call.
        let result = unsafe { ffi::hipDeviceSynchronize() };
        if result != ffi::HIP_SUCCESS {
            return Err(ResourceError::SynchronizeFailed(ffi::error_string(result)));
        }
        Ok(())
    }
}

impl DeviceAllocator for HipAllocator {
    fn name(&self) -> &str {
        "hip"
    }

    fn allocate(&self, bytes: usize) -> ResourceResult<DeviceHandle> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: hipMalloc writes a device pointer into `ptr` on success.
        let result = unsafe { ffi::hipMalloc(&mut ptr, bytes) };
        if result != ffi::HIP_SUCCESS || ptr.is_null() {
            tracing::error!("hipMalloc of {} bytes failed with code {}", bytes, result);
            return Err(ResourceError::DeviceAllocationFailed {
                bytes,
                reason: format!("hipMalloc: {}", ffi::error_string(result)),
            });
        }
        Ok(DeviceHandle::new(ptr as u64, bytes))
    }

    fn free(&self, handle: DeviceHandle) -> ResourceResult<()> {
        // SAFETY: the handle was produced by hipMalloc in `allocate` and the
        // pool frees each handle exactly once.
        let result = unsafe { ffi::hipFree(handle.addr() as *mut c_void) };
        if result != ffi::HIP_SUCCESS {
            return Err(ResourceError::DeviceFreeFailed(format!(
                "hipFree(0x{:x}): {}",
                handle.addr(),
                ffi::error_string(result)
            )));
        }
        Ok(())
    }

    fn copy_to_device(&self, src: &[u8], dst: &DeviceHandle) -> ResourceResult<()> {
        dst.check_transfer(src.len())?;
        // SAFETY: bounds checked above; src is a valid host slice.
        let result = unsafe {
            ffi::hipMemcpy(
                dst.addr() as *mut c_void,
                src.as_ptr() as *const c_void,
                src.len(),
                ffi::HIP_MEMCPY_HOST_TO_DEVICE,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(ResourceError::HostToDeviceFailed(format!(
                "{} bytes to 0x{:x}: {}",
                src.len(),
                dst.addr(),
                ffi::error_string(result)
            )));
        }
        Ok(())
    }

    fn copy_from_device(&self, src: &DeviceHandle, dst: &mut [u8]) -> ResourceResult<()> {
        src.check_transfer(dst.len())?;
        self.synchronize()?;
        // SAFETY: bounds checked above; dst is a valid host slice.
        let result = unsafe {
            ffi::hipMemcpy(
                dst.as_mut_ptr() as *mut c_void,
                src.addr() as *const c_void,
                dst.len(),
                ffi::HIP_MEMCPY_DEVICE_TO_HOST,
            )
        };
        if result != ffi::HIP_SUCCESS {
            return Err(ResourceError::DeviceToHostFailed(format!(
                "{} bytes from 0x{:x}: {}",
                dst.len(),
                src.addr(),
                ffi::error_string(result)
            )));
        }
        Ok(())
    }
}
