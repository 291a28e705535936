//! Grow-only host/device buffer pools
//!
//! A pool owns a fixed set of named roles. Each role is one host allocation
//! and, for roles used by kernels, one device allocation of the same
//! element count. Resizing a pool only reallocates a role when the new
//! problem needs more elements than the role has ever held; smaller or
//! equal problems reuse the existing memory and only update the logical
//! size. Capacity never shrinks.
//!
//! Slices and device views handed out by a pool are valid until the next
//! resize. Re-fetch them after every resize.

pub mod dlrm;
pub mod gemm;

pub use dlrm::{DlrmBwdSizes, DlrmFwdSizes, DlrmProblemSize, DlrmResource};
pub use gemm::{GemmProblemSize, GemmResource, GemmSizes};

use std::marker::PhantomData;

use serde::Serialize;

use crate::backend::{DeviceAllocator, DeviceHandle};
use crate::config::ResourceConfig;
use crate::error::{ResourceError, ResourceResult};
use crate::types::{as_bytes, as_bytes_mut, Element};

/// Non-owning view of a role's device allocation
///
/// A null view (no handle) means the role was never sized.
#[derive(Debug)]
pub struct DeviceView<T> {
    handle: Option<DeviceHandle>,
    len: usize,
    _element: PhantomData<T>,
}

impl<T> Clone for DeviceView<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DeviceView<T> {}

impl<T: Element> DeviceView<T> {
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.handle
    }

    /// Device address, `None` for a null view
    pub fn addr(&self) -> Option<u64> {
        self.handle.map(|h| h.addr())
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_none()
    }

    /// Current logical length in elements
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current logical size in bytes
    pub fn bytes(&self) -> usize {
        self.len * T::size()
    }
}

/// Size and placement facts about a role, independent of its element type
pub trait RoleInfo {
    fn name(&self) -> &'static str;
    fn element_size(&self) -> usize;
    /// High-water mark in elements
    fn capacity(&self) -> usize;
    fn on_device(&self) -> bool;

    fn capacity_bytes(&self) -> usize {
        self.capacity() * self.element_size()
    }
}

/// One named buffer: host memory plus an optional device mirror
#[derive(Debug)]
pub struct RoleBuffer<T: Element> {
    name: &'static str,
    host: Vec<T>,
    device: Option<DeviceHandle>,
    on_device: bool,
    len: usize,
}

impl<T: Element> RoleBuffer<T> {
    /// Role mirrored on the device
    pub fn device_pair(name: &'static str) -> Self {
        Self::empty(name, true)
    }

    /// Role that only exists on the host (reference results)
    pub fn host_only(name: &'static str) -> Self {
        Self::empty(name, false)
    }

    fn empty(name: &'static str, on_device: bool) -> Self {
        RoleBuffer {
            name,
            host: Vec::new(),
            device: None,
            on_device,
            len: 0,
        }
    }

    /// Host elements of the current problem
    pub fn host(&self) -> &[T] {
        &self.host[..self.len]
    }

    pub fn host_mut(&mut self) -> &mut [T] {
        &mut self.host[..self.len]
    }

    pub fn device(&self) -> DeviceView<T> {
        DeviceView {
            handle: self.device,
            len: self.len,
            _element: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Widen the logical length of a role shared by several groups
    ///
    /// Clamped to the capacity; never reallocates.
    pub fn expose(&mut self, elems: usize) {
        self.len = elems.min(self.capacity());
    }
}

impl<T: Element> RoleInfo for RoleBuffer<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn element_size(&self) -> usize {
        T::size()
    }

    fn capacity(&self) -> usize {
        self.host.len()
    }

    fn on_device(&self) -> bool {
        self.on_device
    }
}

/// Memory held by a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryFootprint {
    pub host_bytes: usize,
    pub device_bytes: usize,
    /// Role reallocations over the life of the pool
    pub reallocations: usize,
}

/// State shared by every pool variant: the allocator, configuration and
/// the bookkeeping that outlives individual roles
#[derive(Debug)]
pub struct ResourceBase<B: DeviceAllocator> {
    allocator: B,
    config: ResourceConfig,
    reallocations: usize,
    poisoned: bool,
}

impl<B: DeviceAllocator> ResourceBase<B> {
    pub fn new(allocator: B, config: ResourceConfig) -> Self {
        ResourceBase {
            allocator,
            config,
            reallocations: 0,
            poisoned: false,
        }
    }

    pub fn allocator(&self) -> &B {
        &self.allocator
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn reallocations(&self) -> usize {
        self.reallocations
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn ensure_usable(&self) -> ResourceResult<()> {
        if self.poisoned {
            return Err(ResourceError::PoolPoisoned);
        }
        Ok(())
    }

    /// Fail before touching any role if growing to `plan` would exceed the budget
    ///
    /// `plan` pairs each role with its required element count.
    pub fn check_budget(&self, plan: &[(&dyn RoleInfo, usize)]) -> ResourceResult<()> {
        if self.config.max_pool_bytes.is_none() {
            return Ok(());
        }
        let projected = plan
            .iter()
            .filter(|(role, _)| role.on_device())
            .map(|(role, required)| role.capacity().max(*required) * role.element_size())
            .sum();
        self.config.check_budget(projected)
    }

    /// Make `role` hold at least `elems` elements and set its logical length
    ///
    /// Returns whether the role was reallocated. On failure the role is left
    /// empty and the pool is poisoned.
    pub fn grow<T: Element>(&mut self, role: &mut RoleBuffer<T>, elems: usize) -> ResourceResult<bool> {
        if elems <= role.capacity() {
            role.len = elems;
            return Ok(false);
        }

        let bytes = byte_count(role.name, elems, T::size())?;
        let old_capacity = role.capacity();
        self.release(role);

        if bytes >= self.config.large_allocation_warn_bytes {
            tracing::warn!(
                "{}: large allocation of {} MB",
                role.name,
                bytes / (1024 * 1024)
            );
        }

        match self.allocate_role(role, elems, bytes) {
            Ok(()) => {
                self.reallocations += 1;
                tracing::debug!(
                    "{}: grew {} -> {} elements ({} bytes, {}{})",
                    role.name,
                    old_capacity,
                    elems,
                    bytes,
                    T::NAME,
                    if role.on_device { ", host+device" } else { ", host" }
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!("{}: allocation of {} bytes failed: {}", role.name, bytes, e);
                self.poisoned = true;
                Err(e)
            }
        }
    }

    fn allocate_role<T: Element>(
        &self,
        role: &mut RoleBuffer<T>,
        elems: usize,
        bytes: usize,
    ) -> ResourceResult<()> {
        let mut host = Vec::new();
        host.try_reserve_exact(elems)
            .map_err(|e| ResourceError::HostAllocationFailed {
                bytes,
                reason: e.to_string(),
            })?;
        host.resize(elems, T::default());

        let device = if role.on_device {
            Some(self.allocator.allocate(bytes)?)
        } else {
            None
        };

        role.host = host;
        role.device = device;
        role.len = elems;
        Ok(())
    }

    /// Drop both allocations of `role`, leaving it empty
    ///
    /// A failing device free is logged; the handle is forgotten either way.
    pub fn release<T: Element>(&self, role: &mut RoleBuffer<T>) {
        if let Some(handle) = role.device.take() {
            if let Err(e) = self.allocator.free(handle) {
                tracing::error!("{}: {}", role.name, e);
            }
        }
        role.host = Vec::new();
        role.len = 0;
    }

    /// Copy the first `elems` host elements of `role` to the device
    pub fn upload<T: Element>(&self, role: &RoleBuffer<T>, elems: usize) -> ResourceResult<()> {
        self.ensure_usable()?;
        if elems == 0 {
            return Ok(());
        }
        let handle = role.device.ok_or(ResourceError::NotAllocated(role.name))?;
        let src = role.host.get(..elems).ok_or(ResourceError::TransferOutOfBounds {
            bytes: elems * T::size(),
            capacity: role.capacity_bytes(),
        })?;
        tracing::trace!("{}: host -> device {} bytes", role.name, elems * T::size());
        self.allocator.copy_to_device(as_bytes(src), &handle)
    }

    /// Copy the first `elems` device elements of `role` back to the host
    pub fn download<T: Element>(&self, role: &mut RoleBuffer<T>, elems: usize) -> ResourceResult<()> {
        self.ensure_usable()?;
        if elems == 0 {
            return Ok(());
        }
        let handle = role.device.ok_or(ResourceError::NotAllocated(role.name))?;
        let capacity = role.capacity_bytes();
        let dst = role
            .host
            .get_mut(..elems)
            .ok_or(ResourceError::TransferOutOfBounds {
                bytes: elems * T::size(),
                capacity,
            })?;
        tracing::trace!("{}: device -> host {} bytes", role.name, elems * T::size());
        self.allocator.copy_from_device(&handle, as_bytes_mut(dst))
    }

    pub fn footprint(&self, roles: &[&dyn RoleInfo]) -> MemoryFootprint {
        let host_bytes = roles.iter().map(|r| r.capacity_bytes()).sum();
        let device_bytes = roles
            .iter()
            .filter(|r| r.on_device())
            .map(|r| r.capacity_bytes())
            .sum();
        MemoryFootprint {
            host_bytes,
            device_bytes,
            reallocations: self.reallocations,
        }
    }
}

/// Convert a signed element count from a sizing formula
pub fn element_count(role: &'static str, count: Option<i64>) -> ResourceResult<usize> {
    let count = count.ok_or_else(|| ResourceError::InvalidProblemSize {
        role,
        reason: "element count overflows i64".to_string(),
    })?;
    usize::try_from(count).map_err(|_| ResourceError::InvalidProblemSize {
        role,
        reason: format!("negative element count {}", count),
    })
}

/// Element count scaled to bytes of the role's element type
pub fn byte_count(role: &'static str, elems: usize, element_size: usize) -> ResourceResult<usize> {
    elems
        .checked_mul(element_size)
        .ok_or_else(|| ResourceError::InvalidProblemSize {
            role,
            reason: format!("{} elements overflow a byte count", elems),
        })
}

/// Generates the host slice and device view accessors for pool roles
macro_rules! role_accessors {
    ($($field:ident : $ty:ty => $host:ident, $host_mut:ident $(, $device:ident)?;)*) => {
        $(
            pub fn $host(&self) -> &[$ty] {
                self.$field.host()
            }

            pub fn $host_mut(&mut self) -> &mut [$ty] {
                self.$field.host_mut()
            }

            $(
                pub fn $device(&self) -> $crate::resource::DeviceView<$ty> {
                    self.$field.device()
                }
            )?
        )*
    };
}

pub(crate) use role_accessors;
