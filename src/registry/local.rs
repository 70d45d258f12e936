use super::{
    substitute_references, ChildEvent, ChildEventCallback, ChildEventKind, Registry,
    RegistryError, RegistryResult, WatchId,
};
use crate::mapping::normalize_path;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// In-memory hierarchical registry for single-node deployments and tests.
/// All state is local to this process.
pub struct LocalRegistry {
    // path -> node data
    nodes: RwLock<BTreeMap<String, Bytes>>,

    // Active subtree watches
    watches: DashMap<WatchId, Watch>,
    next_watch: AtomicU64,

    // Serialises mutation + notification so every watcher sees
    // changes in the order they were applied
    write_lock: Mutex<()>,
}

struct Watch {
    prefix: String,
    callback: ChildEventCallback,
}

impl Watch {
    fn covers(&self, path: &str) -> bool {
        is_below(&self.prefix, path)
    }
}

fn is_below(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path != "/";
    }
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

fn checked_path(path: &str) -> RegistryResult<String> {
    if !path.starts_with('/') {
        return Err(RegistryError::InvalidPath(path.to_string()));
    }
    Ok(normalize_path(path))
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            watches: DashMap::new(),
            next_watch: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Create or replace a node's data
    pub fn put(&self, path: &str, data: impl Into<Bytes>) -> RegistryResult<()> {
        let path = checked_path(path)?;
        let data = data.into();

        let _guard = self.write_lock.lock();
        let previous = self.nodes.write().insert(path.clone(), data.clone());

        let kind = if previous.is_some() {
            ChildEventKind::Updated
        } else {
            ChildEventKind::Created
        };
        self.notify(ChildEvent {
            kind,
            path,
            payload: data,
        });

        Ok(())
    }

    /// Delete a node, returning the data it held
    pub fn delete(&self, path: &str) -> RegistryResult<Bytes> {
        let path = checked_path(path)?;

        let _guard = self.write_lock.lock();
        let previous = self
            .nodes
            .write()
            .remove(&path)
            .ok_or_else(|| RegistryError::NotFound(path.clone()))?;

        self.notify(ChildEvent {
            kind: ChildEventKind::Removed,
            path,
            payload: previous.clone(),
        });

        Ok(previous)
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        let path = normalize_path(path);
        self.nodes.read().get(&path).cloned()
    }

    /// Paths of all nodes below `path`
    pub fn descendants(&self, path: &str) -> Vec<String> {
        let prefix = normalize_path(path);
        self.nodes
            .read()
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix.as_str()))
            .filter(|key| is_below(&prefix, key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    fn notify(&self, event: ChildEvent) {
        let targets: Vec<ChildEventCallback> = self
            .watches
            .iter()
            .filter(|watch| watch.covers(&event.path))
            .map(|watch| watch.callback.clone())
            .collect();

        for callback in targets {
            callback(event.clone());
        }
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    fn watch_children(&self, path: &str, on_event: ChildEventCallback) -> RegistryResult<WatchId> {
        let prefix = checked_path(path)?;
        let id = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));

        let _guard = self.write_lock.lock();
        let existing: Vec<(String, Bytes)> = {
            let nodes = self.nodes.read();
            nodes
                .iter()
                .filter(|(key, _)| is_below(&prefix, key))
                .map(|(key, data)| (key.clone(), data.clone()))
                .collect()
        };

        for (path, payload) in existing {
            on_event(ChildEvent {
                kind: ChildEventKind::Created,
                path,
                payload,
            });
        }

        debug!("Watching registry subtree {} (watch {})", prefix, id.0);
        self.watches.insert(
            id,
            Watch {
                prefix,
                callback: on_event,
            },
        );

        Ok(id)
    }

    fn unwatch(&self, id: WatchId) -> bool {
        // Taking the write lock waits out any notification in progress
        let _guard = self.write_lock.lock();
        self.watches.remove(&id).is_some()
    }

    async fn resolve_references(&self, raw: &str) -> RegistryResult<String> {
        substitute_references(raw, |path| {
            self.get(path)
                .map(|data| String::from_utf8_lossy(&data).into_owned())
        })
    }
}
