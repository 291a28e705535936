//! hipresource - reusable host/device buffers for HIP kernel testing
//!
//! Kernel test suites and benchmark sweeps launch the same kernels across
//! thousands of problem sizes. Allocating fresh host and device buffers for
//! every case dominates the run time, so this crate keeps one pool per
//! kernel family and element type and only grows its buffers when a problem
//! needs more room than any earlier one.
//!
//! - [`resource::GemmResource`]: A, B, C, D and a host reference for GEMM
//! - [`resource::DlrmResource`]: forward and backward buffers for DLRM
//!   dot-interaction kernels
//! - [`registry::ResourceRegistry`]: one lazily built pool per type
//! - [`backend::DeviceAllocator`]: the HIP runtime (feature `rocm`) or the
//!   host-memory [`backend::SimDevice`]

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod registry;
pub mod resource;
pub mod types;

#[cfg(feature = "rocm")]
pub use backend::HipAllocator;
pub use backend::{DeviceAllocator, DeviceHandle, SimDevice, SimStats};
pub use config::ResourceConfig;
pub use error::{ErrorCategory, ResourceError, ResourceResult};
pub use registry::{ResourcePool, ResourceRegistry};
pub use resource::{
    DeviceView, DlrmBwdSizes, DlrmFwdSizes, DlrmProblemSize, DlrmResource, GemmProblemSize,
    GemmResource, GemmSizes, MemoryFootprint,
};
pub use types::Element;
