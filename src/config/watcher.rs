//! Hot reload of the configuration file.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save through a rename are still noticed. A reload that
//! fails to parse or validate leaves the published config untouched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::loader::{load_config, ConfigError};
use crate::config::ConfigHandle;

/// Keeps a [`ConfigHandle`] in sync with a file on disk.
pub struct ConfigWatcher {
    path: PathBuf,
    handle: ConfigHandle,
}

impl ConfigWatcher {
    pub fn new(path: &Path, handle: ConfigHandle) -> Self {
        Self {
            path: path.to_path_buf(),
            handle,
        }
    }

    /// Re-read the file and publish it if it differs from the current config.
    /// Returns whether a new config was published.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let next = load_config(&self.path)?;
        if *self.handle.current() == next {
            return Ok(false);
        }
        self.handle.replace(next);
        Ok(true)
    }

    fn is_relevant(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == self.path.file_name())
    }

    /// Start watching. Dropping the returned watcher stops it.
    pub fn spawn(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if self.is_relevant(&event) => match self.reload() {
                    Ok(true) => tracing::info!(path = ?self.path, "Configuration reloaded"),
                    Ok(false) => tracing::debug!(path = ?self.path, "Configuration unchanged"),
                    Err(e) => tracing::error!(path = ?self.path, error = %e, "Reload failed, keeping current configuration"),
                },
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(dir = ?dir, "Config watcher started");
        Ok(watcher)
    }
}
