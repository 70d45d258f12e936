use super::LoadBalancer;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces a fresh balancer for each new routing entry
pub type BalancerFactory = Arc<dyn Fn() -> LoadBalancer + Send + Sync>;

/// Strategy lookup by name. Built-in names resolve to the built-in
/// strategies; anything else must be registered first.
pub struct BalancerRegistry {
    custom: DashMap<String, BalancerFactory>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self {
            custom: DashMap::new(),
        }
    }

    /// Register (or replace) a named strategy
    pub fn register(&self, name: &str, factory: BalancerFactory) {
        debug!("Registering load balancer strategy '{}'", name);
        self.custom.insert(name.to_string(), factory);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.custom.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || LoadBalancer::with_strategy(name).is_some()
    }

    /// Create a balancer for `name`. Registered strategies shadow built-ins.
    pub fn create(&self, name: &str) -> Option<LoadBalancer> {
        if let Some(factory) = self.custom.get(name) {
            return Some((factory.value())());
        }
        LoadBalancer::with_strategy(name)
    }

    /// Like [`create`](Self::create) but falls back to round-robin
    pub fn create_or_default(&self, name: &str) -> LoadBalancer {
        self.create(name).unwrap_or_else(|| {
            warn!("Unknown load balancer '{}', using round-robin", name);
            LoadBalancer::default()
        })
    }
}

impl Default for BalancerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
