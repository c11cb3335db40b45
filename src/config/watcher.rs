//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatewayConfig;
use crate::observability::metrics;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    ///
    /// Invalid files are logged and dropped; the gateway keeps serving the
    /// last good configuration.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            metrics::record_config_reload("loaded");
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            metrics::record_config_reload("rejected");
                            tracing::error!(
                                error = %e,
                                "Failed to reload config, keeping current configuration"
                            );
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
provider_id = "app"

[oauth2]
authorize_url = "https://id.example.com/authorize/"
token_url = "https://id.example.com/token/"
jwks_url = "https://id.example.com/jwks/"

[[providers]]
id = "app"
name = "App"
internal_host = "http://backend:8000"
external_host = "https://app.example.com"
client_id = "abc"
client_secret = "def"
cookie_secret = "0123456789ABCDEFGHIJKLMNOPQRSTUV"
"#;

    #[tokio::test]
    async fn test_valid_edit_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pbprox.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _guard = watcher.run().unwrap();

        let edited = CONFIG.replace("http://backend:8000", "http://backend:9000");
        std::fs::write(&path, edited).unwrap();

        let config = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let config = updates.recv().await.unwrap();
                if config.providers[0].internal_host == "http://backend:9000" {
                    return config;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(config.provider_id, "app");
    }
}
