use super::{Balancer, Destination, RequestContext, RoundRobinBalancer};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_AFFINITY_TTL: Duration = Duration::from_secs(3600);

/// Client-affinity balancer.
///
/// The request's `client_key` is hashed against every candidate URL and the
/// highest score wins (rendezvous hashing), so a key lands on the same
/// backend on every gateway instance. The pick is also remembered locally:
/// as long as the remembered backend is still a candidate the key keeps
/// going there, even if backends are added in between.
///
/// Requests without a key are spread round-robin.
pub struct StickyBalancer {
    /// client key -> backend URL
    affinity: DashMap<String, AffinityEntry>,
    fallback: RoundRobinBalancer,
    ttl: Duration,
    last_cleanup: Mutex<Instant>,
}

struct AffinityEntry {
    url: String,
    last_seen: Instant,
}

impl StickyBalancer {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_AFFINITY_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            affinity: DashMap::new(),
            fallback: RoundRobinBalancer::new(),
            ttl,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Number of remembered client keys (for diagnostics)
    pub fn affinity_count(&self) -> usize {
        self.affinity.len()
    }

    fn score(key: &str, url: &str) -> u64 {
        let mut hasher = sha1_smol::Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(url.as_bytes());
        let digest = hasher.digest().bytes();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head)
    }

    fn rendezvous<'a>(key: &str, candidates: &'a [Destination]) -> Option<&'a Destination> {
        candidates
            .iter()
            .max_by_key(|candidate| Self::score(key, &candidate.url))
    }

    /// Periodically drop affinities that have not been used within the TTL
    fn maybe_cleanup(&self) {
        let mut last_cleanup = self.last_cleanup.lock();
        let cleanup_interval = self.ttl / 10;

        if last_cleanup.elapsed() < cleanup_interval {
            return;
        }

        *last_cleanup = Instant::now();
        drop(last_cleanup);

        let now = Instant::now();
        self.affinity
            .retain(|_, entry| now.duration_since(entry.last_seen) < self.ttl);
    }
}

impl Default for StickyBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for StickyBalancer {
    fn choose<'a>(
        &self,
        candidates: &'a [Destination],
        ctx: &RequestContext,
    ) -> Option<&'a Destination> {
        let Some(key) = ctx.client_key.as_deref() else {
            return self.fallback.choose(candidates, ctx);
        };

        if let Some(mut entry) = self.affinity.get_mut(key) {
            if let Some(found) = candidates.iter().find(|c| c.url == entry.url) {
                entry.last_seen = Instant::now();
                return Some(found);
            }
        }

        let chosen = Self::rendezvous(key, candidates)?;
        self.affinity.insert(
            key.to_string(),
            AffinityEntry {
                url: chosen.url.clone(),
                last_seen: Instant::now(),
            },
        );

        self.maybe_cleanup();

        Some(chosen)
    }

    fn name(&self) -> &str {
        "sticky"
    }
}
