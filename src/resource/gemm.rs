//! Buffer pool for GEMM kernels: `D = alpha * A x B + beta * C`
//!
//! `A` is `M x K` and `B` is `K x N` of the input type; `C`, `D` and the
//! host-only reference result `DRef` are `M x N` of the output type.

use serde::Serialize;

use super::{element_count, role_accessors, MemoryFootprint, ResourceBase, RoleBuffer, RoleInfo};
use crate::backend::DeviceAllocator;
use crate::config::ResourceConfig;
use crate::error::{ResourceError, ResourceResult};
use crate::registry::ResourcePool;
use crate::types::Element;

/// `(M, N, K)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GemmProblemSize {
    pub m: i64,
    pub n: i64,
    pub k: i64,
}

impl GemmProblemSize {
    pub fn new(m: i64, n: i64, k: i64) -> Self {
        GemmProblemSize { m, n, k }
    }

    fn counts(&self) -> ResourceResult<[usize; 3]> {
        Ok([
            element_count("A", self.m.checked_mul(self.k))?,
            element_count("B", self.k.checked_mul(self.n))?,
            element_count("C", self.m.checked_mul(self.n))?,
        ])
    }
}

impl From<(i64, i64, i64)> for GemmProblemSize {
    fn from((m, n, k): (i64, i64, i64)) -> Self {
        GemmProblemSize::new(m, n, k)
    }
}

/// Matrix sizes in bytes: A, B, C, D
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GemmSizes {
    pub a: usize,
    pub b: usize,
    pub c: usize,
    pub d: usize,
}

/// Reusable matrices for GEMM tests with inputs of `In` and outputs of `Out`
pub struct GemmResource<In: Element, Out: Element, B: DeviceAllocator> {
    base: ResourceBase<B>,
    a: RoleBuffer<In>,
    b: RoleBuffer<In>,
    c: RoleBuffer<Out>,
    d: RoleBuffer<Out>,
    d_ref: RoleBuffer<Out>,
    current_problem_size: Option<GemmProblemSize>,
}

impl<In: Element, Out: Element, B: DeviceAllocator> GemmResource<In, Out, B> {
    pub fn new(allocator: B) -> Self {
        Self::with_config(allocator, ResourceConfig::default())
    }

    pub fn with_config(allocator: B, config: ResourceConfig) -> Self {
        GemmResource {
            base: ResourceBase::new(allocator, config),
            a: RoleBuffer::device_pair("A"),
            b: RoleBuffer::device_pair("B"),
            c: RoleBuffer::device_pair("C"),
            d: RoleBuffer::device_pair("D"),
            d_ref: RoleBuffer::host_only("DRef"),
            current_problem_size: None,
        }
    }

    /// Size every matrix for `size`, growing only where needed
    pub fn resize_storage(&mut self, size: impl Into<GemmProblemSize>) -> ResourceResult<()> {
        let size = size.into();
        self.base.ensure_usable()?;
        let [a, b, mn] = size.counts()?;

        self.base.check_budget(&[
            (&self.a as &dyn RoleInfo, a),
            (&self.b, b),
            (&self.c, mn),
            (&self.d, mn),
        ])?;

        let base = &mut self.base;
        base.grow(&mut self.a, a)?;
        base.grow(&mut self.b, b)?;
        base.grow(&mut self.c, mn)?;
        base.grow(&mut self.d, mn)?;
        base.grow(&mut self.d_ref, mn)?;

        tracing::trace!(
            "GemmResource<{}, {}>: storage sized for {:?}",
            In::NAME,
            Out::NAME,
            size
        );
        self.current_problem_size = Some(size);
        Ok(())
    }

    /// Upload A, B, C and D
    pub fn copy_host_to_device_all(&self) -> ResourceResult<()> {
        self.ensure_sized()?;
        self.base.upload(&self.a, self.a.len())?;
        self.base.upload(&self.b, self.b.len())?;
        self.base.upload(&self.c, self.c.len())?;
        self.base.upload(&self.d, self.d.len())
    }

    /// Download D
    pub fn copy_device_to_host_output(&mut self) -> ResourceResult<()> {
        self.ensure_sized()?;
        let len = self.d.len();
        self.base.download(&mut self.d, len)
    }

    /// Download A, B, C and D
    pub fn copy_device_to_host_all(&mut self) -> ResourceResult<()> {
        self.ensure_sized()?;
        let base = &self.base;
        let (a, b, c, d) = (self.a.len(), self.b.len(), self.c.len(), self.d.len());
        base.download(&mut self.a, a)?;
        base.download(&mut self.b, b)?;
        base.download(&mut self.c, c)?;
        base.download(&mut self.d, d)
    }

    fn ensure_sized(&self) -> ResourceResult<()> {
        self.base.ensure_usable()?;
        match self.current_problem_size {
            Some(_) => Ok(()),
            None => Err(ResourceError::Unsized("GEMM")),
        }
    }

    role_accessors! {
        a: In => host_a, host_a_mut, device_a;
        b: In => host_b, host_b_mut, device_b;
        c: Out => host_c, host_c_mut, device_c;
        d: Out => host_d, host_d_mut, device_d;
        d_ref: Out => host_d_ref, host_d_ref_mut;
    }

    pub fn current_problem_size(&self) -> Option<GemmProblemSize> {
        self.current_problem_size
    }

    pub fn current_data_size(&self) -> GemmSizes {
        GemmSizes {
            a: self.a.len() * In::size(),
            b: self.b.len() * In::size(),
            c: self.c.len() * Out::size(),
            d: self.d.len() * Out::size(),
        }
    }

    pub fn max_capacity(&self) -> GemmSizes {
        GemmSizes {
            a: self.a.capacity_bytes(),
            b: self.b.capacity_bytes(),
            c: self.c.capacity_bytes(),
            d: self.d.capacity_bytes(),
        }
    }

    pub fn footprint(&self) -> MemoryFootprint {
        self.base.footprint(&[&self.a, &self.b, &self.c, &self.d, &self.d_ref])
    }

    /// Role reallocations over the life of the pool
    pub fn reallocation_count(&self) -> usize {
        self.base.reallocations()
    }

    pub fn allocator(&self) -> &B {
        self.base.allocator()
    }

    pub fn is_poisoned(&self) -> bool {
        self.base.is_poisoned()
    }
}

impl<In: Element, Out: Element, B: DeviceAllocator> Drop for GemmResource<In, Out, B> {
    fn drop(&mut self) {
        let base = &self.base;
        base.release(&mut self.a);
        base.release(&mut self.b);
        base.release(&mut self.c);
        base.release(&mut self.d);
        base.release(&mut self.d_ref);
    }
}

impl<In: Element, Out: Element, B: DeviceAllocator + 'static> ResourcePool<B>
    for GemmResource<In, Out, B>
{
    fn create(allocator: B, config: ResourceConfig) -> Self {
        Self::with_config(allocator, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimDevice;
    use crate::error::ResourceError;
    use half::bf16;

    #[test]
    fn test_sizes_follow_operand_types() {
        let mut pool = GemmResource::<bf16, f32, _>::new(SimDevice::new());
        pool.resize_storage((2, 3, 4)).unwrap();
        assert_eq!(
            pool.current_data_size(),
            GemmSizes {
                a: 2 * 4 * 2,
                b: 4 * 3 * 2,
                c: 2 * 3 * 4,
                d: 2 * 3 * 4,
            }
        );
        assert_eq!(pool.host_d_ref().len(), 6);
        assert_eq!(pool.footprint().device_bytes, 16 + 24 + 24 + 24);
        assert_eq!(pool.footprint().host_bytes, 16 + 24 + 24 + 24 + 24);
    }

    #[test]
    fn test_roles_grow_independently() {
        let device = SimDevice::new();
        let mut pool = GemmResource::<f32, f32, _>::new(device.clone());
        pool.resize_storage((8, 8, 8)).unwrap();
        let a_addr = pool.device_a().addr();
        let c_addr = pool.device_c().addr();
        let d_addr = pool.device_d().addr();

        // K grows while M*N shrinks: A and B need more room, C and D do not
        pool.resize_storage((4, 4, 32)).unwrap();
        assert_ne!(pool.device_a().addr(), a_addr);
        assert_eq!(pool.device_c().addr(), c_addr);
        assert_eq!(pool.device_d().addr(), d_addr);
        assert_eq!(pool.max_capacity().a, 4 * 32 * 4);
        assert_eq!(pool.max_capacity().b, 32 * 4 * 4);
        assert_eq!(pool.max_capacity().c, 8 * 8 * 4);
        assert_eq!(pool.current_data_size().c, 4 * 4 * 4);

        assert_eq!(device.stats().unwrap().allocations, 4 + 2);
    }

    #[test]
    fn test_zero_dimension_allocates_nothing() {
        let device = SimDevice::new();
        let mut pool = GemmResource::<i8, i32, _>::new(device.clone());
        pool.resize_storage((0, 16, 16)).unwrap();
        assert_eq!(device.stats().unwrap().allocations, 1);
        assert!(pool.device_a().is_null());
        assert!(!pool.device_b().is_null());
        pool.copy_host_to_device_all().unwrap();
    }

    #[test]
    fn test_copy_before_resize_is_rejected() {
        let mut pool = GemmResource::<f32, f32, _>::new(SimDevice::new());
        assert!(pool.host_a().is_empty());
        assert!(pool.device_d().is_null());
        assert!(matches!(
            pool.copy_host_to_device_all(),
            Err(ResourceError::Unsized(_))
        ));
        assert!(matches!(
            pool.copy_device_to_host_all(),
            Err(ResourceError::Unsized(_))
        ));
    }

    #[test]
    fn test_transfer_failure_propagates() {
        let device = SimDevice::new();
        let mut pool = GemmResource::<f32, f32, _>::new(device.clone());
        pool.resize_storage((2, 2, 2)).unwrap();
        device.set_fail_transfers(true).unwrap();
        assert!(matches!(
            pool.copy_host_to_device_all(),
            Err(ResourceError::HostToDeviceFailed(_))
        ));
        assert!(matches!(
            pool.copy_device_to_host_output(),
            Err(ResourceError::DeviceToHostFailed(_))
        ));
        assert!(!pool.is_poisoned());
    }
}
