use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub mapping: MappingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Subtree watched for service registrations
    #[serde(default = "default_registry_path")]
    pub path: String,

    /// Nodes written into the local registry at startup, keyed by absolute
    /// path. Object values are stored as JSON, strings as-is.
    #[serde(default)]
    pub seed: BTreeMap<String, serde_json::Value>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            seed: BTreeMap::new(),
        }
    }
}

fn default_registry_path() -> String {
    "/fabric/registry/clusters/webapps".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    /// Inbound URI template bound against each registered service
    #[serde(default = "default_uri_template")]
    pub uri_template: String,

    /// Only versions equal to this are routed, unless the template
    /// itself has a `{version}` variable
    #[serde(default)]
    pub gateway_version: Option<String>,

    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,

    #[serde(default = "default_true")]
    pub reverse_headers: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            uri_template: default_uri_template(),
            gateway_version: None,
            load_balancer: default_load_balancer(),
            reverse_headers: true,
        }
    }
}

fn default_uri_template() -> String {
    "{contextPath}/".to_string()
}

fn default_load_balancer() -> String {
    "round-robin".to_string()
}

fn default_true() -> bool {
    true
}

impl RegistryConfig {
    /// Seed values rendered to the bytes stored in the registry
    pub fn seed_nodes(&self) -> Vec<(String, String)> {
        self.seed
            .iter()
            .map(|(path, value)| {
                let data = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (path.clone(), data)
            })
            .collect()
    }
}
