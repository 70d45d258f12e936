use super::{
    ChildEvent, ChildEventCallback, ChildEventKind, Registry, RegistryError, RegistryResult,
    ServiceDescriptor, WatchId,
};
use crate::mapping::{normalize_path, MappingRuleBase};
use crate::metrics::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

enum WatchMessage {
    Event(ChildEvent),
    /// Acknowledged once every message queued before it has been applied
    Sync(oneshot::Sender<()>),
}

type SharedSender = Arc<Mutex<Option<mpsc::UnboundedSender<WatchMessage>>>>;

struct Running {
    watch_id: WatchId,
    sender: SharedSender,
    handle: JoinHandle<()>,
}

/// Keeps a [`MappingRuleBase`] in step with a registry subtree.
///
/// Registry callbacks only enqueue; a single task drains the queue and
/// applies events one at a time, so events for one node are applied in
/// registry order even when the client delivers from several threads.
pub struct RegistryTreeWatcher {
    registry: Arc<dyn Registry>,
    rules: Arc<MappingRuleBase>,
    path: String,
    running: Mutex<Option<Running>>,
}

/// State owned by the draining task
struct EventProcessor {
    registry: Arc<dyn Registry>,
    rules: Arc<MappingRuleBase>,
    prefix: String,
}

impl RegistryTreeWatcher {
    pub fn new(registry: Arc<dyn Registry>, rules: Arc<MappingRuleBase>, path: &str) -> Self {
        Self {
            registry,
            rules,
            path: normalize_path(path),
            running: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn rules(&self) -> &Arc<MappingRuleBase> {
        &self.rules
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Start watching. Must be called from within a Tokio runtime.
    /// Calling it on a running watcher is a no-op.
    pub fn init(&self) -> RegistryResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Registry watcher for {} already running", self.path);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RegistryError::Unavailable(format!("no async runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let processor = EventProcessor {
            registry: Arc::clone(&self.registry),
            rules: Arc::clone(&self.rules),
            prefix: self.path.clone(),
        };
        let handle = runtime.spawn(processor.run(rx));

        let callback_sender = Arc::clone(&sender);
        let callback: ChildEventCallback = Arc::new(move |event: ChildEvent| {
            if let Some(tx) = callback_sender.lock().as_ref() {
                if tx.send(WatchMessage::Event(event)).is_err() {
                    trace!("Registry event after watcher stopped");
                }
            }
        });

        let watch_id = match self.registry.watch_children(&self.path, callback) {
            Ok(id) => id,
            Err(e) => {
                sender.lock().take();
                handle.abort();
                return Err(e);
            }
        };

        info!("Watching registry path {} for route changes", self.path);
        *running = Some(Running {
            watch_id,
            sender,
            handle,
        });

        Ok(())
    }

    /// Wait until every event received so far has been applied
    pub async fn sync(&self) -> RegistryResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let running = self.running.lock();
            let stopped = || RegistryError::Unavailable(format!("watcher for {} is stopped", self.path));
            let running = running.as_ref().ok_or_else(stopped)?;
            let sender = running.sender.lock();
            let tx = sender.as_ref().ok_or_else(stopped)?;
            tx.send(WatchMessage::Sync(ack_tx)).map_err(|_| stopped())?;
        }

        ack_rx.await.map_err(|_| {
            RegistryError::Unavailable(format!("watcher for {} stopped while syncing", self.path))
        })
    }

    /// Stop watching. Events already queued are still applied; once this
    /// returns the table is no longer touched. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        self.registry.unwatch(running.watch_id);
        // Dropping the sender lets the task finish after draining the queue
        running.sender.lock().take();

        if let Err(e) = running.handle.await {
            error!("Registry watcher task for {} failed: {}", self.path, e);
        }
        info!("Stopped watching registry path {}", self.path);
    }
}

impl Drop for RegistryTreeWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            self.registry.unwatch(running.watch_id);
            running.sender.lock().take();
        }
    }
}

impl EventProcessor {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<WatchMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                WatchMessage::Event(event) => self.process(event).await,
                WatchMessage::Sync(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Registry event queue for {} closed", self.prefix);
    }

    async fn process(&self, event: ChildEvent) {
        Metrics::record_registry_event(event.kind.as_str());

        if event.payload.is_empty() {
            trace!(path = %event.path, event = %event.kind, "Skipping node without data");
            return;
        }

        let descriptor = match ServiceDescriptor::decode(&event.payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(path = %event.path, event = %event.kind, "Dropping registry event: {}", e);
                Metrics::record_event_dropped("decode");
                return;
            }
        };

        let mut urls = Vec::with_capacity(descriptor.services.len());
        for raw in &descriptor.services {
            match self.registry.resolve_references(raw).await {
                Ok(url) => urls.push(url),
                Err(e) => {
                    warn!(path = %event.path, event = %event.kind, "Skipping service URL: {}", e);
                    Metrics::record_event_dropped("reference");
                }
            }
        }

        let path = self.relative_path(&event.path);
        let params = descriptor.params();
        let remove = event.kind == ChildEventKind::Removed;

        debug!(
            "Registry {} {} -> {} {} url(s) for service '{}'",
            event.kind,
            path,
            if remove { "removing" } else { "adding" },
            urls.len(),
            descriptor.id
        );

        self.rules
            .update_mapping_rules(remove, &path, &urls, &params, Some(Arc::new(descriptor)));
    }

    /// Event path relative to the watched subtree, with a leading slash
    fn relative_path(&self, path: &str) -> String {
        let relative = if self.prefix == "/" {
            path
        } else {
            path.strip_prefix(self.prefix.as_str()).unwrap_or(path)
        };
        normalize_path(relative)
    }
}
