mod types;
pub mod watcher;

pub use types::*;
pub use watcher::{spawn_config_watcher, ConfigWatcher};

use crate::balancer::BalancerRegistry;
use crate::template::UriTemplate;
use anyhow::{Context, Result};
use std::path::Path;

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_yaml(&content)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: GatewayConfig =
            serde_yml::from_str(content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Validate against the built-in balancer strategies only
    pub fn validate(&self) -> Result<()> {
        self.validate_with(&BalancerRegistry::new())
    }

    pub fn validate_with(&self, balancers: &BalancerRegistry) -> Result<()> {
        if !self.registry.path.starts_with('/') {
            anyhow::bail!(
                "registry.path must be an absolute path, got '{}'",
                self.registry.path
            );
        }

        for path in self.registry.seed.keys() {
            if !path.starts_with('/') {
                anyhow::bail!("Seed node '{}' must be an absolute path", path);
            }
        }

        UriTemplate::compile(&self.mapping.uri_template)
            .with_context(|| "Invalid mapping.uriTemplate")?;

        if !balancers.contains(&self.mapping.load_balancer) {
            anyhow::bail!(
                "Unknown load balancer '{}' in mapping.loadBalancer",
                self.mapping.load_balancer
            );
        }

        Ok(())
    }

    /// Whether moving from `previous` to this config touches settings that
    /// are only read at startup. The URI template is not one of them.
    pub fn needs_restart(&self, previous: &GatewayConfig) -> bool {
        self.registry != previous.registry
            || self.mapping.gateway_version != previous.mapping.gateway_version
            || self.mapping.load_balancer != previous.mapping.load_balancer
            || self.mapping.reverse_headers != previous.mapping.reverse_headers
    }
}
