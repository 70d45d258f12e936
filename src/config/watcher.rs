use crate::config::GatewayConfig;
use anyhow::Result;
use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type FsEvents = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Watches the gateway config file and broadcasts every valid revision.
///
/// The parent directory is watched rather than the file itself, so editors
/// that save by writing a temp file and renaming it over the original are
/// still picked up.
pub struct ConfigWatcher {
    config_path: PathBuf,
    quiet_period: Duration,
    tx: broadcast::Sender<GatewayConfig>,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>) -> (Self, broadcast::Receiver<GatewayConfig>) {
        let (tx, rx) = broadcast::channel(16);
        (
            Self {
                config_path: config_path.into(),
                quiet_period: Duration::from_millis(150),
                tx,
            },
            rx,
        )
    }

    /// How long the file must stay untouched before it is re-read
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayConfig> {
        self.tx.subscribe()
    }

    /// Runs until every subscriber has gone away
    pub async fn run(self) -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let mut fs_watcher = recommended_watcher(move |event: notify::Result<Event>| {
            let _ = event_tx.send(event);
        })?;

        let dir = watch_dir(&self.config_path);
        fs_watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching config file for changes: {:?}", self.config_path);

        while let Some(event) = events.recv().await {
            match event {
                Ok(event) if self.concerns(&event) => {
                    debug!("Config file touched: {:?}", event.kind);
                    self.settle(&mut events).await;

                    if !self.reload() {
                        debug!("No config subscribers, stopping watcher");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Config watch error: {}", e),
            }
        }

        Ok(())
    }

    fn concerns(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            return false;
        }
        let Some(name) = self.config_path.file_name() else {
            return false;
        };
        event.paths.iter().any(|path| path.file_name() == Some(name))
    }

    /// Swallow follow-up events until the file has been quiet for a while
    async fn settle(&self, events: &mut FsEvents) {
        while let Ok(Some(_)) = tokio::time::timeout(self.quiet_period, events.recv()).await {}
    }

    /// Load and publish the current file. Returns false once nobody is
    /// listening any more.
    fn reload(&self) -> bool {
        match GatewayConfig::load(&self.config_path) {
            Ok(config) => {
                info!("Config reloaded successfully");
                self.tx.send(config).is_ok()
            }
            Err(e) => {
                warn!("Ignoring config change: {:#}", e);
                true
            }
        }
    }
}

fn watch_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn spawn_config_watcher(
    config_path: PathBuf,
) -> (broadcast::Receiver<GatewayConfig>, JoinHandle<()>) {
    let (watcher, rx) = ConfigWatcher::new(config_path);

    let handle = tokio::spawn(async move {
        if let Err(e) = watcher.run().await {
            error!("Config watcher error: {:#}", e);
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, ModifyKind};

    fn temp_config(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("routekeeper-watch-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reload_publishes_valid_config() {
        let path = temp_config("mapping:\n  uriTemplate: /v2/{servicePath}\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        assert!(watcher.reload());
        let config = rx.try_recv().unwrap();
        assert_eq!(config.mapping.uri_template, "/v2/{servicePath}");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reload_skips_invalid_config() {
        let path = temp_config("mapping:\n  uriTemplate: /v2/{oops\n");
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        assert!(watcher.reload());
        assert!(rx.try_recv().is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_reload_reports_missing_subscribers() {
        let path = temp_config("{}\n");
        let (watcher, rx) = ConfigWatcher::new(&path);
        drop(rx);

        assert!(!watcher.reload());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_only_changes_to_the_config_file_count() {
        let (watcher, _rx) = ConfigWatcher::new("/etc/routekeeper/config.yaml");
        let modify = || Event::new(EventKind::Modify(ModifyKind::Any));

        assert!(watcher.concerns(&modify().add_path("/etc/routekeeper/config.yaml".into())));
        assert!(!watcher.concerns(&modify().add_path("/etc/routekeeper/other.yaml".into())));
        assert!(!watcher.concerns(
            &Event::new(EventKind::Access(AccessKind::Any)).add_path("/etc/routekeeper/config.yaml".into())
        ));
    }

    #[test]
    fn test_watch_dir() {
        assert_eq!(watch_dir(Path::new("/etc/gw/config.yaml")), PathBuf::from("/etc/gw"));
        assert_eq!(watch_dir(Path::new("config.yaml")), PathBuf::from("."));
    }

    #[tokio::test]
    async fn test_settle_drains_bursts() {
        let (watcher, _rx) = ConfigWatcher::new("config.yaml");
        let watcher = watcher.with_quiet_period(Duration::from_millis(20));

        let (tx, mut events) = mpsc::unbounded_channel();
        for _ in 0..5 {
            tx.send(Ok(Event::new(EventKind::Modify(ModifyKind::Any)))).unwrap();
        }

        watcher.settle(&mut events).await;
        assert!(events.try_recv().is_err());
    }
}
