mod descriptor;
mod local;
mod watcher;

pub use descriptor::ServiceDescriptor;
pub use local::LocalRegistry;
pub use watcher::RegistryTreeWatcher;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid registry path: {0}")]
    InvalidPath(String),

    #[error("Registry node not found: {0}")]
    NotFound(String),

    #[error("Failed to decode service payload: {0}")]
    PayloadDecode(String),

    #[error("Failed to resolve references in '{value}': {reason}")]
    ReferenceResolution { value: String, reason: String },

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildEventKind {
    Created,
    Updated,
    Removed,
}

impl ChildEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for ChildEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to a node below a watched path.
/// `payload` is the node data; for removals, the last data it held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEvent {
    pub kind: ChildEventKind,
    pub path: String,
    pub payload: Bytes,
}

pub type ChildEventCallback = Arc<dyn Fn(ChildEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// The distributed registry as seen by the routing core: a hierarchical
/// store whose subtrees can be watched.
///
/// Implementations must deliver events for any one node in the order the
/// registry applied them.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register `on_event` for every node below `path`. Nodes that already
    /// exist are reported as `Created` before any later change.
    fn watch_children(&self, path: &str, on_event: ChildEventCallback) -> RegistryResult<WatchId>;

    /// Stop delivering events to a watch. Returns false if it was unknown.
    fn unwatch(&self, id: WatchId) -> bool;

    /// Expand `${registry:/some/node}` placeholders in `raw` with the
    /// current data of the referenced nodes.
    async fn resolve_references(&self, raw: &str) -> RegistryResult<String>;
}

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{registry:([^}]*)\}").expect("valid reference pattern"));

/// Referenced values may themselves contain references, up to this depth
const MAX_REFERENCE_DEPTH: usize = 8;

/// Substitute registry references using `lookup` to read node data.
pub fn substitute_references<F>(raw: &str, lookup: F) -> RegistryResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut value = raw.to_string();

    for _ in 0..MAX_REFERENCE_DEPTH {
        if !REFERENCE.is_match(&value) {
            return Ok(value);
        }

        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(&value) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let path = path.as_str().trim();
            let resolved = lookup(path).ok_or_else(|| RegistryError::ReferenceResolution {
                value: raw.to_string(),
                reason: format!("no data at '{}'", path),
            })?;

            out.push_str(&value[last..whole.start()]);
            out.push_str(resolved.trim());
            last = whole.end();
        }
        out.push_str(&value[last..]);
        value = out;
    }

    Err(RegistryError::ReferenceResolution {
        value: raw.to_string(),
        reason: "reference nesting too deep".to_string(),
    })
}
