//! Pool configuration
//!
//! [`ResourceConfig`] controls diagnostics and the optional device budget
//! of a pool. Values come from the builder or from environment variables.

use crate::error::{ResourceError, ResourceResult};

const MB: usize = 1024 * 1024;

/// Allocations above this size are logged at `warn`
pub const DEFAULT_LARGE_ALLOCATION_WARN_BYTES: usize = 1024 * MB;

const WARN_ALLOC_ENV: &str = "HIPRESOURCE_WARN_ALLOC_MB";
const MAX_POOL_ENV: &str = "HIPRESOURCE_MAX_POOL_MB";

/// Configuration shared by every pool variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Single allocations of at least this many bytes are logged at `warn`
    pub large_allocation_warn_bytes: usize,

    /// Upper bound on the device bytes a single pool may hold
    pub max_pool_bytes: Option<usize>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        ResourceConfig {
            large_allocation_warn_bytes: DEFAULT_LARGE_ALLOCATION_WARN_BYTES,
            max_pool_bytes: None,
        }
    }
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_large_allocation_warn_bytes(mut self, bytes: usize) -> Self {
        self.large_allocation_warn_bytes = bytes;
        self
    }

    pub fn with_max_pool_bytes(mut self, bytes: usize) -> Self {
        self.max_pool_bytes = Some(bytes);
        self
    }

    /// Build from `HIPRESOURCE_WARN_ALLOC_MB` and `HIPRESOURCE_MAX_POOL_MB`
    ///
    /// Unset variables keep their defaults. Set but unparsable values are an error.
    pub fn from_env() -> ResourceResult<Self> {
        let mut config = Self::default();
        if let Some(mb) = read_mb(WARN_ALLOC_ENV)? {
            config.large_allocation_warn_bytes = mb;
        }
        if let Some(mb) = read_mb(MAX_POOL_ENV)? {
            config.max_pool_bytes = Some(mb);
        }
        Ok(config)
    }

    /// Check a projected device footprint against the budget
    pub fn check_budget(&self, device_bytes: usize) -> ResourceResult<()> {
        match self.max_pool_bytes {
            Some(budget) if device_bytes > budget => Err(ResourceError::BudgetExceeded {
                requested: device_bytes,
                budget,
            }),
            _ => Ok(()),
        }
    }
}

fn read_mb(var: &str) -> ResourceResult<Option<usize>> {
    let raw = match std::env::var(var) {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    let mb: usize = raw.trim().parse().map_err(|_| {
        ResourceError::InvalidConfiguration(format!("{}={:?} is not a whole number of MB", var, raw))
    })?;
    mb.checked_mul(MB).map(Some).ok_or_else(|| {
        ResourceError::InvalidConfiguration(format!("{}={} overflows a byte count", var, mb))
    })
}
