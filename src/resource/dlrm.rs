//! Buffer pool for DLRM dot-interaction kernels
//!
//! The forward pass reads `Input` (`B` batches of an `M x K` feature
//! matrix) and writes `Output`, the `K` bottom-MLP values followed by the
//! strictly-lower triangle of the `M x M` interaction matrix. The backward
//! pass reads `Input` and `UpstreamGrad` and writes `Grad` and
//! `BottomMlpGrad`. `Input` is shared by both passes and has a single
//! allocation.
//!
//! ```ignore
//! let mut pool = DlrmResource::<f16, _>::new(SimDevice::new());
//! pool.resize_fwd_storage((64, 64, 1))?;
//! fill(pool.host_input_mut());
//! pool.copy_host_to_device_fwd_all()?;
//! launch(pool.device_input(), pool.device_output(), pool.device_acc_fwd());
//! pool.copy_device_to_host_fwd_output()?;
//! ```

use serde::Serialize;

use super::{element_count, role_accessors, MemoryFootprint, ResourceBase, RoleBuffer, RoleInfo};
use crate::backend::DeviceAllocator;
use crate::config::ResourceConfig;
use crate::error::{ResourceError, ResourceResult};
use crate::registry::ResourcePool;
use crate::types::Element;

/// `(M, K, B)`: feature count, embedding width, batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DlrmProblemSize {
    pub m: i64,
    pub k: i64,
    pub batch: i64,
}

impl DlrmProblemSize {
    pub fn new(m: i64, k: i64, batch: i64) -> Self {
        DlrmProblemSize { m, k, batch }
    }

    /// Length of one output row: the bottom-MLP passthrough plus the
    /// strictly-lower interaction triangle
    fn tril(&self) -> Option<i64> {
        self.m
            .checked_mul(self.m.checked_sub(1)?)?
            .checked_div(2)?
            .checked_add(self.k)
    }

    fn counts(&self) -> ResourceResult<Counts> {
        let mkb = self.m.checked_mul(self.k).and_then(|n| n.checked_mul(self.batch));
        let mmb = self.m.checked_mul(self.m).and_then(|n| n.checked_mul(self.batch));
        let trilb = self.tril().and_then(|n| n.checked_mul(self.batch));
        let kb = self.k.checked_mul(self.batch);
        Ok(Counts {
            input: element_count("Input", mkb)?,
            output: element_count("Output", trilb)?,
            acc: element_count("Acc", mmb)?,
            grad: element_count("Grad", mkb)?,
            bottom_mlp_grad: element_count("BottomMlpGrad", kb)?,
        })
    }
}

impl From<(i64, i64, i64)> for DlrmProblemSize {
    fn from((m, k, batch): (i64, i64, i64)) -> Self {
        DlrmProblemSize::new(m, k, batch)
    }
}

/// Element counts derived from one problem size. `UpstreamGrad` has the
/// shape of `Output`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    input: usize,
    output: usize,
    acc: usize,
    grad: usize,
    bottom_mlp_grad: usize,
}

/// Forward pass sizes in bytes: Input, Output, Acc
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DlrmFwdSizes {
    pub input: usize,
    pub output: usize,
    pub acc: usize,
}

/// Backward pass sizes in bytes: Input, UpstreamGrad, Acc, Grad, BottomMlpGrad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DlrmBwdSizes {
    pub input: usize,
    pub upstream_grad: usize,
    pub acc: usize,
    pub grad: usize,
    pub bottom_mlp_grad: usize,
}

/// Reusable buffers for DLRM tests of storage type `T`
///
/// The forward accumulator is always `f32`; the backward accumulator uses `T`.
pub struct DlrmResource<T: Element, B: DeviceAllocator> {
    base: ResourceBase<B>,

    // Forward pass
    input: RoleBuffer<T>,
    output: RoleBuffer<T>,
    output_ref: RoleBuffer<T>,
    acc_fwd: RoleBuffer<f32>,

    // Backward pass
    upstream_grad: RoleBuffer<T>,
    acc_bwd: RoleBuffer<T>,
    grad: RoleBuffer<T>,
    grad_ref: RoleBuffer<T>,
    bottom_mlp_grad: RoleBuffer<T>,
    bottom_mlp_grad_ref: RoleBuffer<T>,

    current_problem_size: Option<DlrmProblemSize>,
    fwd_counts: Option<Counts>,
    bwd_counts: Option<Counts>,
}

impl<T: Element, B: DeviceAllocator> DlrmResource<T, B> {
    pub fn new(allocator: B) -> Self {
        Self::with_config(allocator, ResourceConfig::default())
    }

    /// Empty pool; nothing is allocated until the first resize
    pub fn with_config(allocator: B, config: ResourceConfig) -> Self {
        DlrmResource {
            base: ResourceBase::new(allocator, config),
            input: RoleBuffer::device_pair("Input"),
            output: RoleBuffer::device_pair("Output"),
            output_ref: RoleBuffer::host_only("OutputRef"),
            acc_fwd: RoleBuffer::device_pair("AccFwd"),
            upstream_grad: RoleBuffer::device_pair("UpstreamGrad"),
            acc_bwd: RoleBuffer::device_pair("AccBwd"),
            grad: RoleBuffer::device_pair("Grad"),
            grad_ref: RoleBuffer::host_only("GradRef"),
            bottom_mlp_grad: RoleBuffer::device_pair("BottomMlpGrad"),
            bottom_mlp_grad_ref: RoleBuffer::host_only("BottomMlpGradRef"),
            current_problem_size: None,
            fwd_counts: None,
            bwd_counts: None,
        }
    }

    /// Size the forward pass roles for `size`, growing only where needed
    pub fn resize_fwd_storage(&mut self, size: impl Into<DlrmProblemSize>) -> ResourceResult<()> {
        let size = size.into();
        self.base.ensure_usable()?;
        let counts = size.counts()?;

        self.base.check_budget(&[
            (&self.input as &dyn RoleInfo, counts.input),
            (&self.output, counts.output),
            (&self.acc_fwd, counts.acc),
            (&self.upstream_grad, 0),
            (&self.acc_bwd, 0),
            (&self.grad, 0),
            (&self.bottom_mlp_grad, 0),
        ])?;

        let base = &mut self.base;
        base.grow(&mut self.input, counts.input)?;
        base.grow(&mut self.output, counts.output)?;
        base.grow(&mut self.output_ref, counts.output)?;
        base.grow(&mut self.acc_fwd, counts.acc)?;

        tracing::trace!("DlrmResource<{}>: forward storage sized for {:?}", T::NAME, size);
        self.current_problem_size = Some(size);
        self.fwd_counts = Some(counts);
        self.expose_shared_input();
        Ok(())
    }

    /// Size the backward pass roles for `size`, growing only where needed
    pub fn resize_bwd_storage(&mut self, size: impl Into<DlrmProblemSize>) -> ResourceResult<()> {
        let size = size.into();
        self.base.ensure_usable()?;
        let counts = size.counts()?;

        self.base.check_budget(&[
            (&self.input as &dyn RoleInfo, counts.input),
            (&self.output, 0),
            (&self.acc_fwd, 0),
            (&self.upstream_grad, counts.output),
            (&self.acc_bwd, counts.acc),
            (&self.grad, counts.grad),
            (&self.bottom_mlp_grad, counts.bottom_mlp_grad),
        ])?;

        let base = &mut self.base;
        base.grow(&mut self.input, counts.input)?;
        base.grow(&mut self.upstream_grad, counts.output)?;
        base.grow(&mut self.acc_bwd, counts.acc)?;
        base.grow(&mut self.grad, counts.grad)?;
        base.grow(&mut self.grad_ref, counts.grad)?;
        base.grow(&mut self.bottom_mlp_grad, counts.bottom_mlp_grad)?;
        base.grow(&mut self.bottom_mlp_grad_ref, counts.bottom_mlp_grad)?;

        tracing::trace!("DlrmResource<{}>: backward storage sized for {:?}", T::NAME, size);
        self.current_problem_size = Some(size);
        self.bwd_counts = Some(counts);
        self.expose_shared_input();
        Ok(())
    }

    /// Upload Input, Output and AccFwd
    pub fn copy_host_to_device_fwd_all(&self) -> ResourceResult<()> {
        let c = self.sized_fwd()?;
        self.base.upload(&self.input, c.input)?;
        self.base.upload(&self.output, c.output)?;
        self.base.upload(&self.acc_fwd, c.acc)
    }

    /// Upload Input, UpstreamGrad, AccBwd, Grad and BottomMlpGrad
    pub fn copy_host_to_device_bwd_all(&self) -> ResourceResult<()> {
        let c = self.sized_bwd()?;
        self.base.upload(&self.input, c.input)?;
        self.base.upload(&self.upstream_grad, c.output)?;
        self.base.upload(&self.acc_bwd, c.acc)?;
        self.base.upload(&self.grad, c.grad)?;
        self.base.upload(&self.bottom_mlp_grad, c.bottom_mlp_grad)
    }

    /// Download Output
    pub fn copy_device_to_host_fwd_output(&mut self) -> ResourceResult<()> {
        let c = self.sized_fwd()?;
        self.base.download(&mut self.output, c.output)
    }

    /// Download Grad and BottomMlpGrad
    pub fn copy_device_to_host_bwd_output(&mut self) -> ResourceResult<()> {
        let c = self.sized_bwd()?;
        self.base.download(&mut self.grad, c.grad)?;
        self.base.download(&mut self.bottom_mlp_grad, c.bottom_mlp_grad)
    }

    /// `Input` serves both passes, so its host and device views cover the
    /// larger of the two current requirements
    fn expose_shared_input(&mut self) {
        let fwd = self.fwd_counts.map_or(0, |c| c.input);
        let bwd = self.bwd_counts.map_or(0, |c| c.input);
        self.input.expose(fwd.max(bwd));
    }

    fn sized_fwd(&self) -> ResourceResult<Counts> {
        self.base.ensure_usable()?;
        self.fwd_counts.ok_or(ResourceError::Unsized("DLRM forward"))
    }

    fn sized_bwd(&self) -> ResourceResult<Counts> {
        self.base.ensure_usable()?;
        self.bwd_counts.ok_or(ResourceError::Unsized("DLRM backward"))
    }

    role_accessors! {
        input: T => host_input, host_input_mut, device_input;
        output: T => host_output, host_output_mut, device_output;
        output_ref: T => host_output_ref, host_output_ref_mut;
        acc_fwd: f32 => host_acc_fwd, host_acc_fwd_mut, device_acc_fwd;
        upstream_grad: T => host_upstream_grad, host_upstream_grad_mut, device_upstream_grad;
        acc_bwd: T => host_acc_bwd, host_acc_bwd_mut, device_acc_bwd;
        grad: T => host_grad, host_grad_mut, device_grad;
        grad_ref: T => host_grad_ref, host_grad_ref_mut;
        bottom_mlp_grad: T => host_bottom_mlp_grad, host_bottom_mlp_grad_mut, device_bottom_mlp_grad;
        bottom_mlp_grad_ref: T => host_bottom_mlp_grad_ref, host_bottom_mlp_grad_ref_mut;
    }

    pub fn current_problem_size(&self) -> Option<DlrmProblemSize> {
        self.current_problem_size
    }

    /// Logical forward sizes of the last forward resize
    pub fn current_data_size_fwd(&self) -> DlrmFwdSizes {
        let c = self.fwd_counts.unwrap_or_default();
        DlrmFwdSizes {
            input: c.input * T::size(),
            output: c.output * T::size(),
            acc: c.acc * f32::size(),
        }
    }

    /// Logical backward sizes of the last backward resize
    pub fn current_data_size_bwd(&self) -> DlrmBwdSizes {
        let c = self.bwd_counts.unwrap_or_default();
        DlrmBwdSizes {
            input: c.input * T::size(),
            upstream_grad: c.output * T::size(),
            acc: c.acc * T::size(),
            grad: c.grad * T::size(),
            bottom_mlp_grad: c.bottom_mlp_grad * T::size(),
        }
    }

    pub fn max_fwd_capacity(&self) -> DlrmFwdSizes {
        DlrmFwdSizes {
            input: self.input.capacity_bytes(),
            output: self.output.capacity_bytes(),
            acc: self.acc_fwd.capacity_bytes(),
        }
    }

    pub fn max_bwd_capacity(&self) -> DlrmBwdSizes {
        DlrmBwdSizes {
            input: self.input.capacity_bytes(),
            upstream_grad: self.upstream_grad.capacity_bytes(),
            acc: self.acc_bwd.capacity_bytes(),
            grad: self.grad.capacity_bytes(),
            bottom_mlp_grad: self.bottom_mlp_grad.capacity_bytes(),
        }
    }

    pub fn footprint(&self) -> MemoryFootprint {
        self.base.footprint(&self.roles())
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

    fn roles(&self) -> [&dyn RoleInfo; 10] {
        [
            &self.input,
            &self.output,
            &self.output_ref,
            &self.acc_fwd,
            &self.upstream_grad,
            &self.acc_bwd,
            &self.grad,
            &self.grad_ref,
            &self.bottom_mlp_grad,
            &self.bottom_mlp_grad_ref,
        ]
    }
}

impl<T: Element, B: DeviceAllocator> Drop for DlrmResource<T, B> {
    fn drop(&mut self) {
        tracing::debug!(
            "DlrmResource<{}>: releasing {:?}",
            T::NAME,
            self.footprint()
        );
        let base = &self.base;
        base.release(&mut self.input);
        base.release(&mut self.output);
        base.release(&mut self.output_ref);
        base.release(&mut self.acc_fwd);
        base.release(&mut self.upstream_grad);
        base.release(&mut self.acc_bwd);
        base.release(&mut self.grad);
        base.release(&mut self.grad_ref);
        base.release(&mut self.bottom_mlp_grad);
        base.release(&mut self.bottom_mlp_grad_ref);
    }
}

impl<T: Element, B: DeviceAllocator + 'static> ResourcePool<B> for DlrmResource<T, B> {
    fn create(allocator: B, config: ResourceConfig) -> Self {
        Self::with_config(allocator, config)
    }
}
