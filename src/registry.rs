//! One pool per variant and element type for the life of a test run
//!
//! A benchmark sweep runs thousands of problem sizes against the same
//! buffers. The orchestrating code owns a [`ResourceRegistry`] and asks it
//! for pools; the first request for a given pool type builds it (empty,
//! nothing allocated) and every later request returns the same instance.
//! Dropping the registry releases every pool.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::backend::DeviceAllocator;
use crate::config::ResourceConfig;

/// A pool the registry knows how to build
pub trait ResourcePool<B>: Any {
    /// Construct an empty pool; must not allocate
    fn create(allocator: B, config: ResourceConfig) -> Self
    where
        Self: Sized;
}

/// Lazily built pools keyed by their concrete type
///
/// Not thread-safe by contract: callers need `&mut` for every lookup.
pub struct ResourceRegistry<B: DeviceAllocator + Clone> {
    allocator: B,
    config: ResourceConfig,
    pools: HashMap<TypeId, Box<dyn Any>>,
}

impl<B: DeviceAllocator + Clone + 'static> ResourceRegistry<B> {
    pub fn new(allocator: B) -> Self {
        Self::with_config(allocator, ResourceConfig::default())
    }

    /// Every pool built by this registry gets a clone of `config`
    pub fn with_config(allocator: B, config: ResourceConfig) -> Self {
        ResourceRegistry {
            allocator,
            config,
            pools: HashMap::new(),
        }
    }

    /// The pool of type `P`, built on first request
    pub fn get_or_create<P: ResourcePool<B>>(&mut self) -> &mut P {
        let allocator = &self.allocator;
        let config = &self.config;
        let pool = self.pools.entry(TypeId::of::<P>()).or_insert_with(|| {
            tracing::debug!(
                "ResourceRegistry: creating {} on {}",
                std::any::type_name::<P>(),
                allocator.name()
            );
            Box::new(P::create(allocator.clone(), config.clone())) as Box<dyn Any>
        });
        match pool.downcast_mut::<P>() {
            Some(pool) => pool,
            // Entries are keyed by TypeId::of::<P>, so the downcast always matches
            None => unreachable!("registry entry does not match its TypeId"),
        }
    }

    /// The pool of type `P` if it was already built
    pub fn get<P: ResourcePool<B>>(&self) -> Option<&P> {
        self.pools
            .get(&TypeId::of::<P>())
            .and_then(|pool| pool.downcast_ref::<P>())
    }

    pub fn contains<P: ResourcePool<B>>(&self) -> bool {
        self.pools.contains_key(&TypeId::of::<P>())
    }

    /// Number of pools built so far
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn allocator(&self) -> &B {
        &self.allocator
    }
}

impl<B: DeviceAllocator + Clone> Drop for ResourceRegistry<B> {
    fn drop(&mut self) {
        if !self.pools.is_empty() {
            tracing::debug!("ResourceRegistry: tearing down {} pools", self.pools.len());
        }
        self.pools.clear();
    }
}
