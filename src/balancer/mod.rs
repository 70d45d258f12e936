mod random;
mod registry;
mod round_robin;
mod sticky;
mod weighted;

pub use random::RandomBalancer;
pub use registry::{BalancerFactory, BalancerRegistry};
pub use round_robin::RoundRobinBalancer;
pub use sticky::StickyBalancer;
pub use weighted::WeightedBalancer;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BalancerError {
    #[error("No available backend")]
    NoAvailableBackend,
}

/// Weight of a candidate nobody assigned one to
pub const DEFAULT_WEIGHT: u32 = 1;

/// A candidate backend handed to a balancer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub url: String,
    pub weight: u32,
}

impl Destination {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn with_weight(url: impl Into<String>, weight: u32) -> Self {
        Self {
            url: url.into(),
            weight,
        }
    }
}

/// Per-request inputs a strategy may consult.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    /// Affinity key (client address, session cookie, ...) used by sticky balancing
    pub client_key: Option<String>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            client_key: None,
        }
    }

    pub fn with_client_key(mut self, key: impl Into<String>) -> Self {
        self.client_key = Some(key.into());
        self
    }
}

/// Strategy seam for custom balancers registered at runtime.
pub trait Balancer: Send + Sync {
    /// Pick one of `candidates`. Called with a non-empty slice.
    fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        ctx: &RequestContext,
    ) -> Option<&'a Destination>;

    fn name(&self) -> &str;
}

pub enum LoadBalancer {
    RoundRobin(RoundRobinBalancer),
    Random(RandomBalancer),
    Sticky(StickyBalancer),
    Weighted(WeightedBalancer),
    Custom(Arc<dyn Balancer>),
}

impl LoadBalancer {
    /// Create a built-in strategy by name
    pub fn with_strategy(strategy: &str) -> Option<Self> {
        let lb = match strategy {
            "round-robin" | "round_robin" | "roundRobin" | "roundrobin" => {
                Self::RoundRobin(RoundRobinBalancer::new())
            }
            "random" => Self::Random(RandomBalancer::new()),
            "sticky" => Self::Sticky(StickyBalancer::new()),
            "weighted" => Self::Weighted(WeightedBalancer::new()),
            _ => return None,
        };
        Some(lb)
    }

    pub fn custom(balancer: Arc<dyn Balancer>) -> Self {
        Self::Custom(balancer)
    }

    #[inline]
    pub fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        ctx: &RequestContext,
    ) -> Result<&'a Destination, BalancerError> {
        if candidates.is_empty() {
            return Err(BalancerError::NoAvailableBackend);
        }

        let chosen = match self {
            Self::RoundRobin(lb) => lb.choose(candidates, ctx),
            Self::Random(lb) => lb.choose(candidates, ctx),
            Self::Sticky(lb) => lb.choose(candidates, ctx),
            Self::Weighted(lb) => lb.choose(candidates, ctx),
            Self::Custom(lb) => lb.choose(candidates, ctx),
        };

        chosen.ok_or(BalancerError::NoAvailableBackend)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::RoundRobin(lb) => lb.name(),
            Self::Random(lb) => lb.name(),
            Self::Sticky(lb) => lb.name(),
            Self::Weighted(lb) => lb.name(),
            Self::Custom(lb) => lb.name(),
        }
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::RoundRobin(RoundRobinBalancer::new())
    }
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadBalancer").field(&self.name()).finish()
    }
}

/// Fast xorshift random - no allocation, no syscall
#[inline]
pub(crate) fn fast_random() -> u32 {
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u32> = Cell::new(0xDEADBEEF);
    }
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state.set(x);
        x
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FirstBalancer;

    impl Balancer for FirstBalancer {
        fn choose<'a>(
            &self,
            candidates: &'a [Destination],
            _ctx: &RequestContext,
        ) -> Option<&'a Destination> {
            candidates.first()
        }

        fn name(&self) -> &str {
            "first"
        }
    }

    #[test]
    fn test_empty_candidates_is_no_backend() {
        let ctx = RequestContext::default();
        for name in ["round-robin", "random", "sticky", "weighted"] {
            let lb = LoadBalancer::with_strategy(name).unwrap();
            assert_eq!(lb.choose(&[], &ctx), Err(BalancerError::NoAvailableBackend));
        }
    }

    #[test]
    fn test_unknown_strategy() {
        assert!(LoadBalancer::with_strategy("least-latency").is_none());
    }

    #[test]
    fn test_custom_strategy_dispatch() {
        let lb = LoadBalancer::custom(Arc::new(FirstBalancer));
        let candidates = vec![Destination::new("http://a:80"), Destination::new("http://b:80")];

        let chosen = lb.choose(&candidates, &RequestContext::default()).unwrap();
        assert_eq!(chosen.url, "http://a:80");
        assert_eq!(lb.name(), "first");
    }
}
