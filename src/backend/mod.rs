//! Device memory capability consumed by the pools
//!
//! A pool never talks to a GPU runtime directly. It calls into a
//! [`DeviceAllocator`], which is either the HIP runtime (feature `rocm`)
//! or [`SimDevice`], an emulation backed by host memory.

#[cfg(feature = "rocm")]
pub mod hip;
pub mod sim;

#[cfg(feature = "rocm")]
pub use hip::HipAllocator;
pub use sim::{SimDevice, SimStats};

use crate::error::{ResourceError, ResourceResult};

/// Opaque reference to one device allocation
///
/// The address is only meaningful to the allocator that issued it. Two
/// handles compare equal exactly when they name the same allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    addr: u64,
    bytes: usize,
}

impl DeviceHandle {
    pub fn new(addr: u64, bytes: usize) -> Self {
        DeviceHandle { addr, bytes }
    }

    /// Device address (HIP) or allocation id (simulation)
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Allocated size in bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Reject copies of more than `len` bytes into or out of this allocation
    pub fn check_transfer(&self, len: usize) -> ResourceResult<()> {
        if len > self.bytes {
            return Err(ResourceError::TransferOutOfBounds {
                bytes: len,
                capacity: self.bytes,
            });
        }
        Ok(())
    }
}

/// Allocation and transfer primitives for one device
///
/// Copies always start at offset zero of the device allocation and move
/// exactly the length of the host slice. `copy_from_device` must not
/// return before prior device work writing to `src` has completed.
pub trait DeviceAllocator {
    /// Human readable backend name for logs
    fn name(&self) -> &str;

    fn allocate(&self, bytes: usize) -> ResourceResult<DeviceHandle>;

    fn free(&self, handle: DeviceHandle) -> ResourceResult<()>;

    fn copy_to_device(&self, src: &[u8], dst: &DeviceHandle) -> ResourceResult<()>;

    fn copy_from_device(&self, src: &DeviceHandle, dst: &mut [u8]) -> ResourceResult<()>;
}
