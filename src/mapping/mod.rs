//! Registry-driven routing table.
//!
//! Maps concrete inbound paths (the inbound URI template bound against the
//! parameters of a registered service) to the set of backend URLs currently
//! serving them.

mod services;

pub use services::MappedServices;

use crate::balancer::BalancerRegistry;
use crate::config::MappingConfig;
use crate::metrics::Metrics;
use crate::registry::ServiceDescriptor;
use crate::template::{Bindings, TemplateError, UriTemplate};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Parameter carrying the registry-relative path of the event
pub const SERVICE_PATH_PARAM: &str = "servicePath";
pub const VERSION_PARAM: &str = "version";

pub type RoutesChangedListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned when registering a routes-changed listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of a longest-prefix lookup
#[derive(Debug, Clone)]
pub struct MappedRoute {
    /// Table key that matched
    pub path: String,
    /// Part of the request path below `path`, without a leading slash
    pub remaining: String,
    pub services: MappedServices,
}

pub struct MappingRuleBase {
    uri_template: ArcSwap<UriTemplate>,
    gateway_version: Option<String>,
    load_balancer: String,
    balancers: Arc<BalancerRegistry>,
    reverse_headers: bool,
    rules: DashMap<String, MappedServices>,
    listeners: DashMap<ListenerId, RoutesChangedListener>,
}

impl MappingRuleBase {
    pub fn new(uri_template: UriTemplate) -> Self {
        Self {
            uri_template: ArcSwap::from_pointee(uri_template),
            gateway_version: None,
            load_balancer: "round-robin".to_string(),
            balancers: Arc::new(BalancerRegistry::new()),
            reverse_headers: true,
            rules: DashMap::new(),
            listeners: DashMap::new(),
        }
    }

    pub fn from_config(
        config: &MappingConfig,
        balancers: Arc<BalancerRegistry>,
    ) -> Result<Self, TemplateError> {
        let template = UriTemplate::compile(&config.uri_template)?;
        let mut base = Self::new(template)
            .with_load_balancer(&config.load_balancer)
            .with_reverse_headers(config.reverse_headers)
            .with_balancers(balancers);
        base.gateway_version = config.gateway_version.clone().filter(|v| !v.is_empty());
        Ok(base)
    }

    pub fn with_gateway_version(mut self, version: impl Into<String>) -> Self {
        self.gateway_version = Some(version.into());
        self
    }

    /// Strategy name used for entries created from now on
    pub fn with_load_balancer(mut self, name: &str) -> Self {
        self.load_balancer = name.to_string();
        self
    }

    pub fn with_reverse_headers(mut self, reverse_headers: bool) -> Self {
        self.reverse_headers = reverse_headers;
        self
    }

    pub fn with_balancers(mut self, balancers: Arc<BalancerRegistry>) -> Self {
        self.balancers = balancers;
        self
    }

    pub fn uri_template(&self) -> Arc<UriTemplate> {
        self.uri_template.load_full()
    }

    /// Replace the inbound template. Existing entries keep their keys;
    /// only subsequent updates are bound against the new template.
    pub fn set_uri_template(&self, pattern: &str) -> Result<(), TemplateError> {
        let template = UriTemplate::compile(pattern)?;
        info!("Inbound URI template changed to '{}'", template);
        self.uri_template.store(Arc::new(template));
        Ok(())
    }

    pub fn gateway_version(&self) -> Option<&str> {
        self.gateway_version.as_deref()
    }

    pub fn is_reverse_headers(&self) -> bool {
        self.reverse_headers
    }

    /// Apply one registry event to the table.
    ///
    /// Each URL in `services` is bound with `default_params`, the synthetic
    /// `servicePath` param and the params derived from the URL itself to get
    /// its table key. Adds merge into an existing entry; removes drop the
    /// URL and delete the entry once it has no URLs left. Listeners fire
    /// once afterwards.
    pub fn update_mapping_rules(
        &self,
        remove: bool,
        path: &str,
        services: &[String],
        default_params: &HashMap<String, String>,
        descriptor: Option<Arc<ServiceDescriptor>>,
    ) {
        let template = self.uri_template.load();
        let mut remove = remove;

        if !remove && !template.has_variable(VERSION_PARAM) {
            if let (Some(gateway_version), Some(version)) = (
                self.gateway_version.as_deref(),
                default_params.get(VERSION_PARAM).map(|v| v.trim()),
            ) {
                // Routes for versions this gateway does not serve are dropped.
                // A later matching event does not restore what an earlier
                // mismatched one removed.
                if !version.is_empty() && version != gateway_version {
                    debug!(
                        "Ignoring '{}' version {} (gateway serves {})",
                        path, version, gateway_version
                    );
                    remove = true;
                }
            }
        }

        let mut base_params: Bindings = default_params.clone();
        base_params.insert(SERVICE_PATH_PARAM.to_string(), path.to_string());

        for service in services {
            let mut params = base_params.clone();
            params.extend(url_params(service));
            let key = normalize_path(&template.bind_non_strict(&params));

            if remove {
                self.remove_service(&key, service);
            } else {
                self.add_service(&key, service, descriptor.clone());
            }
        }

        Metrics::set_mapping_rules(self.rules.len());
        self.fire_routes_changed();
    }

    fn add_service(&self, key: &str, service: &str, descriptor: Option<Arc<ServiceDescriptor>>) {
        let weight = descriptor.as_ref().and_then(|d| d.weight);

        let mut entry = self
            .rules
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.add_url(service) {
                    debug!("Added {} to '{}' ({} backends)", service, key, entry.len());
                }
                entry.set_descriptor(descriptor.clone());
            })
            .or_insert_with(|| {
                debug!("New mapping '{}' -> {}", key, service);
                let balancer = self.balancers.create_or_default(&self.load_balancer);
                MappedServices::new(service, descriptor.clone(), Arc::new(balancer), self.reverse_headers)
            });

        if let Some(weight) = weight {
            entry.set_weight(service, weight);
        }
    }

    /// Set the balancing weight of one backend of the entry at `path`.
    /// Returns false if there is no such entry or backend. Weights last
    /// until the URL is removed from the entry.
    pub fn set_weight(&self, path: &str, service: &str, weight: u32) -> bool {
        let updated = self
            .rules
            .get_mut(&normalize_path(path))
            .is_some_and(|mut entry| entry.set_weight(service, weight));

        if updated {
            debug!("Weight of {} under '{}' set to {}", service, path, weight);
            self.fire_routes_changed();
        }
        updated
    }

    fn remove_service(&self, key: &str, service: &str) {
        let now_empty = match self.rules.get_mut(key) {
            Some(mut entry) => {
                if entry.remove_url(service) {
                    debug!("Removed {} from '{}' ({} backends)", service, key, entry.len());
                }
                entry.is_empty()
            }
            None => {
                trace!("No mapping '{}' to remove {} from", key, service);
                false
            }
        };

        if now_empty && self.rules.remove_if(key, |_, entry| entry.is_empty()).is_some() {
            debug!("Mapping '{}' has no backends left, removed", key);
        }
    }

    /// Copy the current table into `out`. The copy is a point-in-time
    /// snapshot; no lock is held once this returns.
    pub fn append_mapped_services(&self, out: &mut HashMap<String, MappedServices>) {
        for entry in self.rules.iter() {
            out.insert(entry.key().clone(), entry.value().clone());
        }
    }

    pub fn mapped_services(&self) -> HashMap<String, MappedServices> {
        let mut out = HashMap::with_capacity(self.rules.len());
        self.append_mapped_services(&mut out);
        out
    }

    /// Exact lookup by concrete path
    pub fn get(&self, path: &str) -> Option<MappedServices> {
        self.rules
            .get(&normalize_path(path))
            .map(|entry| entry.value().clone())
    }

    /// Find the entry whose key is the longest segment-aligned prefix of
    /// `request_path`.
    pub fn find(&self, request_path: &str) -> Option<MappedRoute> {
        let path = normalize_path(request_path);
        let mut prefix = path.as_str();

        loop {
            if let Some(entry) = self.rules.get(prefix) {
                let remaining = path[prefix.len()..].trim_start_matches('/').to_string();
                return Some(MappedRoute {
                    path: prefix.to_string(),
                    remaining,
                    services: entry.value().clone(),
                });
            }

            if prefix == "/" {
                return None;
            }

            prefix = match prefix.rfind('/') {
                Some(0) => "/",
                Some(idx) => &prefix[..idx],
                None => return None,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn add_listener(&self, listener: RoutesChangedListener) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    fn fire_routes_changed(&self) {
        // Snapshot first so listeners may (un)register listeners themselves
        let listeners: Vec<RoutesChangedListener> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for listener in listeners {
            listener();
        }
    }
}

impl fmt::Debug for MappingRuleBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingRuleBase")
            .field("uri_template", &self.uri_template.load().pattern())
            .field("gateway_version", &self.gateway_version)
            .field("load_balancer", &self.load_balancer)
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Params derived from a backend URL: `protocol`, `host`, `port`, `contextPath`
pub fn url_params(service: &str) -> Bindings {
    let mut params = Bindings::new();

    match url::Url::parse(service) {
        Ok(url) => {
            params.insert("protocol".to_string(), url.scheme().to_string());
            if let Some(host) = url.host_str() {
                params.insert("host".to_string(), host.to_string());
            }
            if let Some(port) = url.port_or_known_default() {
                params.insert("port".to_string(), port.to_string());
            }
            params.insert("contextPath".to_string(), url.path().to_string());
        }
        Err(e) => {
            debug!("Could not parse service URL '{}': {}", service, e);
        }
    }

    params
}

/// Leading slash, no trailing slash (except root), no empty segments
pub fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}
