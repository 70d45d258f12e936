use crate::balancer::{BalancerError, Destination, LoadBalancer, RequestContext, DEFAULT_WEIGHT};
use crate::template::{TemplateError, UriTemplate};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A hand-authored proxy rule: requests matching `uri_template` are sent
/// to one of the destination templates.
///
/// Setters take `&self` and return `&Self` so a shared rule can be
/// configured fluently:
///
/// ```
/// # use routekeeper::rules::DeclarativeRuleBase;
/// let rules = DeclarativeRuleBase::new();
/// rules
///     .rule("/search/{*query}")?
///     .to("http://search-a:8080/q/{query}")?
///     .to("http://search-b:8080/q/{query}")?
///     .set_cookie_path("/search");
/// # Ok::<(), routekeeper::template::TemplateError>(())
/// ```
pub struct HttpProxyRule {
    uri_template: UriTemplate,
    destinations: RwLock<Vec<(UriTemplate, u32)>>,
    load_balancer: ArcSwap<LoadBalancer>,
    reverse_headers: AtomicBool,
    cookie_path: RwLock<Option<String>>,
    cookie_domain: RwLock<Option<String>>,
}

impl HttpProxyRule {
    pub fn new(uri_template: UriTemplate) -> Self {
        Self {
            uri_template,
            destinations: RwLock::new(Vec::new()),
            load_balancer: ArcSwap::from_pointee(LoadBalancer::default()),
            reverse_headers: AtomicBool::new(true),
            cookie_path: RwLock::new(None),
            cookie_domain: RwLock::new(None),
        }
    }

    pub fn uri_template(&self) -> &UriTemplate {
        &self.uri_template
    }

    /// Add a destination template. Adding the same pattern twice is a no-op.
    pub fn to(&self, destination: &str) -> Result<&Self, TemplateError> {
        let template = UriTemplate::compile(destination)?;
        let mut destinations = self.destinations.write();
        if !destinations.iter().any(|(d, _)| *d == template) {
            destinations.push((template, DEFAULT_WEIGHT));
        }
        Ok(self)
    }

    /// Add a destination with a balancing weight, or reweight it if the
    /// pattern is already present.
    pub fn to_weighted(&self, destination: &str, weight: u32) -> Result<&Self, TemplateError> {
        let template = UriTemplate::compile(destination)?;
        let mut destinations = self.destinations.write();
        match destinations.iter_mut().find(|(d, _)| *d == template) {
            Some((_, existing)) => *existing = weight,
            None => destinations.push((template, weight)),
        }
        Ok(self)
    }

    pub fn remove_destination(&self, destination: &str) -> bool {
        let mut destinations = self.destinations.write();
        let before = destinations.len();
        destinations.retain(|(d, _)| d.pattern() != destination.trim());
        destinations.len() != before
    }

    pub fn destinations(&self) -> Vec<UriTemplate> {
        self.destinations.read().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn weight(&self, destination: &str) -> Option<u32> {
        self.destinations
            .read()
            .iter()
            .find(|(d, _)| d.pattern() == destination.trim())
            .map(|(_, weight)| *weight)
    }

    pub fn set_load_balancer(&self, load_balancer: LoadBalancer) -> &Self {
        self.load_balancer.store(Arc::new(load_balancer));
        self
    }

    pub fn load_balancer(&self) -> Arc<LoadBalancer> {
        self.load_balancer.load_full()
    }

    pub fn set_reverse_headers(&self, reverse_headers: bool) -> &Self {
        self.reverse_headers.store(reverse_headers, Ordering::Relaxed);
        self
    }

    pub fn is_reverse_headers(&self) -> bool {
        self.reverse_headers.load(Ordering::Relaxed)
    }

    pub fn set_cookie_path(&self, path: impl Into<String>) -> &Self {
        *self.cookie_path.write() = Some(path.into());
        self
    }

    pub fn cookie_path(&self) -> Option<String> {
        self.cookie_path.read().clone()
    }

    pub fn set_cookie_domain(&self, domain: impl Into<String>) -> &Self {
        *self.cookie_domain.write() = Some(domain.into());
        self
    }

    pub fn cookie_domain(&self) -> Option<String> {
        self.cookie_domain.read().clone()
    }

    /// Pick a destination template with this rule's balancer
    pub fn choose_back_end_service(&self, ctx: &RequestContext) -> Result<UriTemplate, BalancerError> {
        let destinations = self.destinations.read();
        let candidates: Vec<Destination> = destinations
            .iter()
            .map(|(d, weight)| Destination::with_weight(d.pattern(), *weight))
            .collect();

        let chosen = self.load_balancer.load().choose(&candidates, ctx)?;
        destinations
            .iter()
            .find(|(d, _)| d.pattern() == chosen.url)
            .map(|(d, _)| d.clone())
            .ok_or(BalancerError::NoAvailableBackend)
    }
}

impl fmt::Debug for HttpProxyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProxyRule")
            .field("uri_template", &self.uri_template.pattern())
            .field("destinations", &self.destinations.read().len())
            .field("load_balancer", &self.load_balancer.load().name())
            .field("reverse_headers", &self.is_reverse_headers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str) -> HttpProxyRule {
        HttpProxyRule::new(UriTemplate::compile(pattern).unwrap())
    }

    #[test]
    fn test_builder_chain() {
        let rule = rule("/shop/{*rest}");
        rule.to("http://a:8080/{rest}")
            .unwrap()
            .to("http://b:8080/{rest}")
            .unwrap()
            .set_reverse_headers(false)
            .set_cookie_path("/shop")
            .set_cookie_domain("example.com");

        assert_eq!(rule.destinations().len(), 2);
        assert!(!rule.is_reverse_headers());
        assert_eq!(rule.cookie_path().as_deref(), Some("/shop"));
        assert_eq!(rule.cookie_domain().as_deref(), Some("example.com"));
    }

    #[test]
    fn test_duplicate_destination_ignored() {
        let rule = rule("/a");
        rule.to("http://a:1/").unwrap().to("http://a:1/").unwrap();
        assert_eq!(rule.destinations().len(), 1);

        assert!(rule.remove_destination("http://a:1/"));
        assert!(rule.destinations().is_empty());
    }

    #[test]
    fn test_weighted_destinations() {
        let rule = rule("/a");
        rule.to("http://a:1/")
            .unwrap()
            .to_weighted("http://b:1/", 3)
            .unwrap()
            .to("http://b:1/")
            .unwrap();

        assert_eq!(rule.weight("http://a:1/"), Some(1));
        // re-adding with `to` keeps the weight
        assert_eq!(rule.weight("http://b:1/"), Some(3));

        rule.to_weighted("http://a:1/", 0).unwrap();
        assert_eq!(rule.weight("http://a:1/"), Some(0));
        assert_eq!(rule.destinations().len(), 2);

        rule.set_load_balancer(LoadBalancer::with_strategy("weighted").unwrap());
        let ctx = RequestContext::default();
        for _ in 0..50 {
            let chosen = rule.choose_back_end_service(&ctx).unwrap();
            assert_eq!(chosen.pattern(), "http://b:1/");
        }
        assert_eq!(rule.weight("http://missing:1/"), None);
    }

    #[test]
    fn test_bad_destination_rejected() {
        let rule = rule("/a");
        assert!(rule.to("http://a:1/{oops").is_err());
        assert!(rule.destinations().is_empty());
    }

    #[test]
    fn test_choose_back_end_service() {
        let rule = rule("/a");
        let ctx = RequestContext::default();
        assert_eq!(
            rule.choose_back_end_service(&ctx),
            Err(BalancerError::NoAvailableBackend)
        );

        rule.to("http://a:1/").unwrap().to("http://b:1/").unwrap();
        let first = rule.choose_back_end_service(&ctx).unwrap();
        let second = rule.choose_back_end_service(&ctx).unwrap();
        assert_ne!(first, second);

        rule.set_load_balancer(LoadBalancer::with_strategy("sticky").unwrap());
        let keyed = RequestContext::new("/a").with_client_key("k");
        let pinned = rule.choose_back_end_service(&keyed).unwrap();
        assert_eq!(rule.choose_back_end_service(&keyed).unwrap(), pinned);
    }
}
