use super::{fast_random, Balancer, Destination, RequestContext};

/// Uniform random choice, ignoring weights
pub struct RandomBalancer;

impl RandomBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RandomBalancer {
    fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        _ctx: &RequestContext,
    ) -> Option<&'a Destination> {
        if candidates.is_empty() {
            return None;
        }

        let idx = fast_random() as usize % candidates.len();
        candidates.get(idx)
    }

    fn name(&self) -> &str {
        "random"
    }
}
