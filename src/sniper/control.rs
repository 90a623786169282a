//! Operator pause/resume control.
//!
//! An external process flips a small JSON document `{"running": bool}`;
//! the watcher mirrors it into a shared [`PauseFlag`] that the dispatcher
//! checks before taking work off the queue.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shared paused/running switch.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag {
    paused: Arc<AtomicBool>,
}

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Apply a running state. Returns true if it changed.
    pub fn set_running(&self, running: bool) -> bool {
        self.paused.swap(!running, Ordering::SeqCst) == running
    }
}

#[derive(Debug, Deserialize)]
struct ControlDocument {
    #[serde(default = "running_default")]
    running: bool,
}

fn running_default() -> bool {
    true
}

/// Read the control document. A missing file or a missing `running` key
/// means running.
pub async fn read_control_file(path: &Path) -> Result<bool> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(e).with_context(|| format!("reading control file {}", path.display()))
        }
    };
    let doc: ControlDocument = serde_json::from_str(&content)
        .with_context(|| format!("parsing control file {}", path.display()))?;
    Ok(doc.running)
}

/// Polls the control file and mirrors it into a [`PauseFlag`].
pub struct ControlFileWatcher {
    path: PathBuf,
    poll: Duration,
    flag: PauseFlag,
}

impl ControlFileWatcher {
    pub fn new(path: impl Into<PathBuf>, poll: Duration, flag: PauseFlag) -> Self {
        Self {
            path: path.into(),
            poll,
            flag,
        }
    }

    /// Read the file once and update the flag. An unreadable or corrupt
    /// file counts as running.
    pub async fn refresh(&self) {
        let running = match read_control_file(&self.path).await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = ?e, "Unreadable control file, treating as running");
                true
            }
        };
        if self.flag.set_running(running) {
            if running {
                info!(path = %self.path.display(), "Trading resumed");
            } else {
                info!(path = %self.path.display(), "Trading paused");
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.refresh().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll) => {}
                _ = shutdown.changed() => break,
            }
        }
    }
}
