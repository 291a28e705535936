//! Host-memory emulation of a device
//!
//! [`SimDevice`] hands out allocations backed by `Vec<u8>` and records every
//! allocation, free and transfer. Tests use the counters to prove when a
//! resize did or did not touch the allocator, and the fault switches to
//! exercise allocator and transfer failures.
//!
//! Clones share the same device, so a test can keep one clone for
//! inspection while a pool owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::backend::{DeviceAllocator, DeviceHandle};
use crate::error::{ResourceError, ResourceResult};

/// First synthetic address handed out; spacing keeps addresses distinct
const BASE_ADDR: u64 = 0x7f00_0000_0000;
const ADDR_ALIGN: u64 = 256;

/// Allocation and transfer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub allocations: usize,
    pub frees: usize,
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub copies_to_device: usize,
    pub copies_to_host: usize,
    pub bytes_to_device: usize,
    pub bytes_to_host: usize,
}

#[derive(Debug, Default)]
struct SimState {
    next_addr: u64,
    memory: HashMap<u64, Vec<u8>>,
    stats: SimStats,
    capacity_bytes: Option<usize>,
    fail_allocation_at: Option<usize>,
    fail_transfers: bool,
}

/// Emulated device with shared state
#[derive(Debug, Clone, Default)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose total live memory may not exceed `bytes`
    pub fn with_capacity(bytes: usize) -> Self {
        let device = Self::new();
        if let Ok(mut state) = device.state.lock() {
            state.capacity_bytes = Some(bytes);
        }
        device
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> ResourceResult<SimStats> {
        Ok(self.state.lock()?.stats)
    }

    /// Make the allocation with zero-based index `n` (counting from device creation) fail
    pub fn fail_allocation_at(&self, n: usize) -> ResourceResult<()> {
        self.state.lock()?.fail_allocation_at = Some(n);
        Ok(())
    }

    /// Make every subsequent transfer fail until switched off
    pub fn set_fail_transfers(&self, fail: bool) -> ResourceResult<()> {
        self.state.lock()?.fail_transfers = fail;
        Ok(())
    }

    /// Run `kernel` against the raw bytes of a device allocation
    ///
    /// Stands in for a kernel launch in tests.
    pub fn with_device_bytes<R>(
        &self,
        handle: &DeviceHandle,
        kernel: impl FnOnce(&mut [u8]) -> R,
    ) -> ResourceResult<R> {
        let mut state = self.state.lock()?;
        let memory = state
            .memory
            .get_mut(&handle.addr())
            .ok_or(ResourceError::UnknownHandle(handle.addr()))?;
        Ok(kernel(memory))
    }
}

impl DeviceAllocator for SimDevice {
    fn name(&self) -> &str {
        "sim"
    }

    fn allocate(&self, bytes: usize) -> ResourceResult<DeviceHandle> {
        let mut state = self.state.lock()?;

        if state.fail_allocation_at == Some(state.stats.allocations) {
            state.fail_allocation_at = None;
            return Err(ResourceError::DeviceAllocationFailed {
                bytes,
                reason: "injected allocation fault".to_string(),
            });
        }
        if let Some(capacity) = state.capacity_bytes {
            if state.stats.live_bytes.saturating_add(bytes) > capacity {
                return Err(ResourceError::DeviceAllocationFailed {
                    bytes,
                    reason: format!(
                        "out of device memory ({} of {} bytes in use)",
                        state.stats.live_bytes, capacity
                    ),
                });
            }
        }

        let addr = BASE_ADDR + state.next_addr;
        let span = (bytes as u64).max(1).div_ceil(ADDR_ALIGN) * ADDR_ALIGN;
        state.next_addr += span;
        state.memory.insert(addr, vec![0u8; bytes]);

        let stats = &mut state.stats;
        stats.allocations += 1;
        stats.live_allocations += 1;
        stats.live_bytes += bytes;
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);

        tracing::trace!("SimDevice: allocated {} bytes at 0x{:x}", bytes, addr);
        Ok(DeviceHandle::new(addr, bytes))
    }

    fn free(&self, handle: DeviceHandle) -> ResourceResult<()> {
        let mut state = self.state.lock()?;
        let memory = state
            .memory
            .remove(&handle.addr())
            .ok_or(ResourceError::UnknownHandle(handle.addr()))?;

        let stats = &mut state.stats;
        stats.frees += 1;
        stats.live_allocations -= 1;
        stats.live_bytes -= memory.len();
        Ok(())
    }

    fn copy_to_device(&self, src: &[u8], dst: &DeviceHandle) -> ResourceResult<()> {
        dst.check_transfer(src.len())?;
        let mut state = self.state.lock()?;
        if state.fail_transfers {
            return Err(ResourceError::HostToDeviceFailed(
                "injected transfer fault".to_string(),
            ));
        }
        let memory = state
            .memory
            .get_mut(&dst.addr())
            .ok_or(ResourceError::UnknownHandle(dst.addr()))?;
        memory[..src.len()].copy_from_slice(src);

        state.stats.copies_to_device += 1;
        state.stats.bytes_to_device += src.len();
        Ok(())
    }

    fn copy_from_device(&self, src: &DeviceHandle, dst: &mut [u8]) -> ResourceResult<()> {
        src.check_transfer(dst.len())?;
        let mut state = self.state.lock()?;
        if state.fail_transfers {
            return Err(ResourceError::DeviceToHostFailed(
                "injected transfer fault".to_string(),
            ));
        }
        let memory = state
            .memory
            .get(&src.addr())
            .ok_or(ResourceError::UnknownHandle(src.addr()))?;
        dst.copy_from_slice(&memory[..dst.len()]);

        state.stats.copies_to_host += 1;
        state.stats.bytes_to_host += dst.len();
        Ok(())
    }
}
