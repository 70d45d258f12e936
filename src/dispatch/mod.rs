//! Request-path resolution for the dispatch layer.
//!
//! Registry-driven mappings are consulted first (longest matching path),
//! then declarative rules in declaration order.

use crate::balancer::{BalancerError, RequestContext};
use crate::mapping::{normalize_path, ListenerId, MappingRuleBase, RoutesChangedListener};
use crate::metrics::Metrics;
use crate::rules::DeclarativeRuleBase;
use crate::template::TemplateError;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("No route matches {0}")]
    NoRoute(String),

    #[error("No available backend for {0}")]
    NoAvailableBackend(String),

    #[error("Failed to build destination URL: {0}")]
    Binding(#[from] TemplateError),
}

/// Where a resolved route came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteSource {
    /// Registry mapping, keyed by its concrete inbound path
    Registry { path: String },
    /// Declarative rule, keyed by its inbound template
    Declarative { template: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Fully built backend URL for this request
    pub destination_url: String,
    /// Every backend the balancer chose from
    pub candidates: Vec<String>,
    pub reverse_headers: bool,
    pub cookie_path: Option<String>,
    pub cookie_domain: Option<String>,
    pub source: RouteSource,
}

pub struct Dispatcher {
    mapping: Arc<MappingRuleBase>,
    rules: Arc<DeclarativeRuleBase>,
}

impl Dispatcher {
    pub fn new(mapping: Arc<MappingRuleBase>, rules: Arc<DeclarativeRuleBase>) -> Self {
        Self { mapping, rules }
    }

    pub fn mapping(&self) -> &Arc<MappingRuleBase> {
        &self.mapping
    }

    pub fn rules(&self) -> &Arc<DeclarativeRuleBase> {
        &self.rules
    }

    pub fn resolve_route(&self, request_path: &str) -> Result<ResolvedRoute, RouteError> {
        self.resolve(&RequestContext::new(request_path))
    }

    /// Resolve `ctx.path` to a backend URL. Both route sources see the same
    /// normalized path; a query string is carried over to the destination.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<ResolvedRoute, RouteError> {
        let (raw_path, query) = match ctx.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (ctx.path.as_str(), None),
        };
        let normalized = normalize_path(raw_path);
        let path = normalized.as_str();

        let result = self
            .resolve_mapped(path, ctx)
            .or_else(|| self.resolve_declarative(path, ctx))
            .unwrap_or_else(|| Err(RouteError::NoRoute(path.to_string())));

        match &result {
            Ok(route) => {
                let outcome = match route.source {
                    RouteSource::Registry { .. } => "registry",
                    RouteSource::Declarative { .. } => "declarative",
                };
                Metrics::record_route_lookup(outcome);
                debug!("Resolved {} -> {}", path, route.destination_url);
            }
            Err(RouteError::NoRoute(_)) => Metrics::record_route_lookup("no_route"),
            Err(RouteError::NoAvailableBackend(_)) => Metrics::record_route_lookup("no_backend"),
            Err(RouteError::Binding(_)) => Metrics::record_route_lookup("binding_error"),
        }

        result.map(|mut route| {
            if let Some(query) = query {
                route.destination_url.push('?');
                route.destination_url.push_str(query);
            }
            route
        })
    }

    fn resolve_mapped(
        &self,
        path: &str,
        ctx: &RequestContext,
    ) -> Option<Result<ResolvedRoute, RouteError>> {
        let mapped = self.mapping.find(path)?;

        let backend = match mapped.services.choose(ctx) {
            Ok(backend) => backend,
            Err(BalancerError::NoAvailableBackend) => {
                return Some(Err(RouteError::NoAvailableBackend(path.to_string())));
            }
        };

        let mut destination_url = backend.trim_end_matches('/').to_string();
        if !mapped.remaining.is_empty() {
            destination_url.push('/');
            destination_url.push_str(&mapped.remaining);
        }

        Some(Ok(ResolvedRoute {
            destination_url,
            candidates: mapped.services.service_urls().iter().cloned().collect(),
            reverse_headers: mapped.services.is_reverse_headers(),
            cookie_path: None,
            cookie_domain: None,
            source: RouteSource::Registry { path: mapped.path },
        }))
    }

    fn resolve_declarative(
        &self,
        path: &str,
        ctx: &RequestContext,
    ) -> Option<Result<ResolvedRoute, RouteError>> {
        let matched = self.rules.matches(path)?;
        let rule = &matched.rule;

        let destination = match rule.choose_back_end_service(ctx) {
            Ok(destination) => destination,
            Err(BalancerError::NoAvailableBackend) => {
                return Some(Err(RouteError::NoAvailableBackend(path.to_string())));
            }
        };

        let destination_url = match destination.bind(&matched.bindings) {
            Ok(url) => url,
            Err(e) => return Some(Err(e.into())),
        };

        Some(Ok(ResolvedRoute {
            destination_url,
            candidates: rule
                .destinations()
                .iter()
                .map(|d| d.pattern().to_string())
                .collect(),
            reverse_headers: rule.is_reverse_headers(),
            cookie_path: rule.cookie_path(),
            cookie_domain: rule.cookie_domain(),
            source: RouteSource::Declarative {
                template: rule.uri_template().pattern().to_string(),
            },
        }))
    }

    pub fn on_routes_changed(&self, listener: RoutesChangedListener) -> ListenerId {
        self.mapping.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.mapping.remove_listener(id)
    }
}
