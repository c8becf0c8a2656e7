//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ResilienceConfig;

/// Watches a configuration file and publishes each valid revision.
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::UnboundedSender<ResilienceConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path` and the receiving end of its updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ResilienceConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                updates,
            },
            rx,
        )
    }

    /// Start watching. The returned handle must be kept alive; dropping it stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, updates } = self;
        let reload_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => reload(&reload_path, &updates),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

fn reload(path: &Path, updates: &mpsc::UnboundedSender<ResilienceConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(path = ?path, "Config reloaded");
            if updates.send(config).is_err() {
                tracing::debug!("Config receiver dropped, discarding reload");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Rejected config reload, keeping current configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn test_content_change_filter() {
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_reload_sends_only_valid_config() {
        let dir = std::env::temp_dir().join(format!("resilient-call-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let (watcher, mut rx) = ConfigWatcher::new(&path);

        std::fs::write(&path, "[retries]\nmax_retries = 7\n").unwrap();
        reload(&path, &watcher.updates);
        assert_eq!(rx.try_recv().unwrap().retries.max_retries, 7);

        std::fs::write(&path, "[circuit_breaker]\nfailure_threshold = 0\n").unwrap();
        reload(&path, &watcher.updates);
        assert!(rx.try_recv().is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
