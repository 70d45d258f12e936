use super::{fast_random, Balancer, Destination, RequestContext};

/// Weighted random load balancer.
/// A candidate is picked with probability `weight / total_weight`;
/// when every weight is zero the choice falls back to uniform.
pub struct WeightedBalancer;

impl WeightedBalancer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WeightedBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for WeightedBalancer {
    fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        _ctx: &RequestContext,
    ) -> Option<&'a Destination> {
        if candidates.is_empty() {
            return None;
        }

        let total_weight: u64 = candidates.iter().map(|c| c.weight as u64).sum();
        if total_weight == 0 {
            let idx = fast_random() as usize % candidates.len();
            return candidates.get(idx);
        }

        let rand = fast_random() as u64 % total_weight;

        let mut cumulative = 0u64;
        for candidate in candidates {
            cumulative += candidate.weight as u64;
            if rand < cumulative {
                return Some(candidate);
            }
        }

        // Fallback
        candidates.last()
    }

    fn name(&self) -> &str {
        "weighted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_weighted_candidates() -> Vec<Destination> {
        vec![
            Destination::with_weight("http://server0:8080", 5),
            Destination::with_weight("http://server1:8080", 3),
            Destination::with_weight("http://server2:8080", 2),
        ]
    }

    #[test]
    fn test_weighted_distribution() {
        let balancer = WeightedBalancer::new();
        let candidates = make_weighted_candidates();
        let ctx = RequestContext::default();

        let mut counts = [0u32; 3];
        for _ in 0..10_000 {
            let chosen = balancer.choose(&candidates, &ctx).unwrap();
            let idx = candidates.iter().position(|c| c == chosen).unwrap();
            counts[idx] += 1;
        }

        // Weight ratio is 5:3:2, so expect roughly 5000:3000:2000
        assert!(counts[0] > counts[1]);
        assert!(counts[1] > counts[2]);
        assert!(counts[2] > 1000);
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let balancer = WeightedBalancer::new();
        let candidates = vec![
            Destination::with_weight("http://live:8080", 1),
            Destination::with_weight("http://drained:8080", 0),
        ];
        let ctx = RequestContext::default();

        for _ in 0..200 {
            assert_eq!(balancer.choose(&candidates, &ctx).unwrap().url, "http://live:8080");
        }
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_uniform() {
        let balancer = WeightedBalancer::new();
        let candidates = vec![
            Destination::with_weight("http://a:8080", 0),
            Destination::with_weight("http://b:8080", 0),
        ];

        assert!(balancer.choose(&candidates, &RequestContext::default()).is_some());
    }
}
