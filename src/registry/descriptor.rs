use super::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payload a service writes into its registry node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,

    #[serde(default)]
    pub container: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub bundle_name: String,

    #[serde(default)]
    pub bundle_version: String,

    /// Balancing weight applied to every URL below; unset means the
    /// default weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,

    /// Backend URLs, possibly containing registry references.
    /// Empty means the service has no endpoints right now.
    pub services: Vec<String>,
}

impl ServiceDescriptor {
    pub fn decode(payload: &[u8]) -> Result<Self, RegistryError> {
        let descriptor: Self = serde_json::from_slice(payload)
            .map_err(|e| RegistryError::PayloadDecode(e.to_string()))?;

        if descriptor.id.trim().is_empty() {
            return Err(RegistryError::PayloadDecode("empty service id".to_string()));
        }

        Ok(descriptor)
    }

    /// Template parameters contributed by this descriptor. Blank fields are
    /// left out so non-strict binding skips them.
    pub fn params(&self) -> HashMap<String, String> {
        [
            ("id", &self.id),
            ("container", &self.container),
            ("version", &self.version),
            ("bundleName", &self.bundle_name),
            ("bundleVersion", &self.bundle_version),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal() {
        let descriptor =
            ServiceDescriptor::decode(br#"{"id":"s1","services":["http://h1:80"]}"#).unwrap();
        assert_eq!(descriptor.id, "s1");
        assert_eq!(descriptor.services, vec!["http://h1:80"]);
        assert!(descriptor.version.is_empty());
        assert!(descriptor.weight.is_none());
    }

    #[test]
    fn test_decode_full() {
        let payload = br#"{
            "id": "crm",
            "container": "root",
            "version": "1.0",
            "bundleName": "io.example.crm",
            "bundleVersion": "1.0.3",
            "weight": 3,
            "services": []
        }"#;
        let descriptor = ServiceDescriptor::decode(payload).unwrap();
        assert_eq!(descriptor.bundle_name, "io.example.crm");
        assert_eq!(descriptor.weight, Some(3));
        assert!(descriptor.services.is_empty());

        let params = descriptor.params();
        assert_eq!(params["version"], "1.0");
        assert_eq!(params["bundleVersion"], "1.0.3");
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn test_params_skip_blank_fields() {
        let descriptor =
            ServiceDescriptor::decode(br#"{"id":"s1","services":["http://h1:80"]}"#).unwrap();
        let params = descriptor.params();
        assert_eq!(params.len(), 1);
        assert!(!params.contains_key("version"));
    }

    #[test]
    fn test_decode_failures() {
        assert!(ServiceDescriptor::decode(b"not json").is_err());
        assert!(ServiceDescriptor::decode(br#"{"id":"s1"}"#).is_err());
        assert!(ServiceDescriptor::decode(br#"{"id":"","services":[]}"#).is_err());
        assert!(ServiceDescriptor::decode(br#"{"id":"s1","services":"http://h"}"#).is_err());
    }
}
