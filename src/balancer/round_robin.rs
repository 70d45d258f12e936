use super::{Balancer, Destination, RequestContext};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Advances a shared cursor by exactly one per call, modulo the candidate count
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RoundRobinBalancer {
    fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        _ctx: &RequestContext,
    ) -> Option<&'a Destination> {
        if candidates.is_empty() {
            return None;
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(idx)
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}
