use crate::balancer::{BalancerError, Destination, LoadBalancer, RequestContext, DEFAULT_WEIGHT};
use crate::registry::ServiceDescriptor;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// The live backends for one concrete inbound path.
///
/// Cloning is cheap apart from the URL set; the balancer and descriptor are
/// shared, so a snapshot keeps advancing the same round-robin cursor as the
/// table entry it was copied from.
#[derive(Debug, Clone)]
pub struct MappedServices {
    /// Representative URL, used for display and equality
    service_url: String,
    service_urls: BTreeSet<String>,
    // Only URLs with a non-default weight are listed
    weights: HashMap<String, u32>,
    load_balancer: Arc<LoadBalancer>,
    reverse_headers: bool,
    descriptor: Option<Arc<ServiceDescriptor>>,
}

impl MappedServices {
    pub fn new(
        service_url: impl Into<String>,
        descriptor: Option<Arc<ServiceDescriptor>>,
        load_balancer: Arc<LoadBalancer>,
        reverse_headers: bool,
    ) -> Self {
        let service_url = service_url.into();
        let mut service_urls = BTreeSet::new();
        service_urls.insert(service_url.clone());

        Self {
            service_url,
            service_urls,
            weights: HashMap::new(),
            load_balancer,
            reverse_headers,
            descriptor,
        }
    }

    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    pub fn service_urls(&self) -> &BTreeSet<String> {
        &self.service_urls
    }

    pub fn contains(&self, url: &str) -> bool {
        self.service_urls.contains(url)
    }

    pub fn is_empty(&self) -> bool {
        self.service_urls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.service_urls.len()
    }

    pub fn load_balancer(&self) -> &Arc<LoadBalancer> {
        &self.load_balancer
    }

    pub fn is_reverse_headers(&self) -> bool {
        self.reverse_headers
    }

    /// Metadata of the service that last registered under this path
    pub fn descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptor.as_deref()
    }

    /// Balancing weight of `url`; 1 unless set otherwise
    pub fn weight(&self, url: &str) -> u32 {
        self.weights.get(url).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Candidate list in stable (sorted) order
    pub fn candidates(&self) -> Vec<Destination> {
        self.service_urls
            .iter()
            .map(|url| Destination::with_weight(url, self.weight(url)))
            .collect()
    }

    /// Pick one backend URL with this entry's balancer
    pub fn choose(&self, ctx: &RequestContext) -> Result<String, BalancerError> {
        let candidates = self.candidates();
        self.load_balancer
            .choose(&candidates, ctx)
            .map(|destination| destination.url.clone())
    }

    pub(crate) fn add_url(&mut self, url: &str) -> bool {
        if self.service_urls.is_empty() {
            self.service_url = url.to_string();
        }
        self.service_urls.insert(url.to_string())
    }

    /// Returns false if `url` is not part of this entry
    pub(crate) fn set_weight(&mut self, url: &str, weight: u32) -> bool {
        if !self.service_urls.contains(url) {
            return false;
        }
        if weight == DEFAULT_WEIGHT {
            self.weights.remove(url);
        } else {
            self.weights.insert(url.to_string(), weight);
        }
        true
    }

    pub(crate) fn remove_url(&mut self, url: &str) -> bool {
        let removed = self.service_urls.remove(url);
        self.weights.remove(url);
        if removed && self.service_url == url {
            if let Some(next) = self.service_urls.iter().next() {
                self.service_url = next.clone();
            }
        }
        removed
    }

    pub(crate) fn set_descriptor(&mut self, descriptor: Option<Arc<ServiceDescriptor>>) {
        if descriptor.is_some() {
            self.descriptor = descriptor;
        }
    }
}

impl PartialEq for MappedServices {
    fn eq(&self, other: &Self) -> bool {
        self.service_url == other.service_url && self.service_urls == other.service_urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str) -> MappedServices {
        MappedServices::new(url, None, Arc::new(LoadBalancer::default()), true)
    }

    #[test]
    fn test_add_merges_urls() {
        let mut services = entry("http://h1:80");
        assert!(services.add_url("http://h2:80"));
        assert!(!services.add_url("http://h1:80"));

        assert_eq!(services.len(), 2);
        assert_eq!(services.service_url(), "http://h1:80");
        assert!(services.is_reverse_headers());
    }

    #[test]
    fn test_remove_repoints_representative() {
        let mut services = entry("http://h1:80");
        services.add_url("http://h2:80");

        assert!(services.remove_url("http://h1:80"));
        assert_eq!(services.service_url(), "http://h2:80");
        assert!(!services.remove_url("http://h9:80"));

        assert!(services.remove_url("http://h2:80"));
        assert!(services.is_empty());
    }

    #[test]
    fn test_choose_round_robins_candidates() {
        let mut services = entry("http://h1:80");
        services.add_url("http://h2:80");
        let ctx = RequestContext::default();

        let first = services.choose(&ctx).unwrap();
        let second = services.choose(&ctx).unwrap();
        assert_ne!(first, second);

        // snapshots share the balancer cursor
        let snapshot = services.clone();
        assert_eq!(snapshot.choose(&ctx).unwrap(), first);
    }

    #[test]
    fn test_weights_follow_urls() {
        let mut services = entry("http://h1:80");
        services.add_url("http://h2:80");

        assert!(services.set_weight("http://h2:80", 5));
        assert!(!services.set_weight("http://h9:80", 5));

        let weights: Vec<u32> = services.candidates().iter().map(|d| d.weight).collect();
        assert_eq!(weights, vec![1, 5]);

        services.remove_url("http://h2:80");
        services.add_url("http://h2:80");
        assert_eq!(services.weight("http://h2:80"), 1);
    }
}
