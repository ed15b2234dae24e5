//! Sibling `.lock` file that serializes access to a history file across processes.
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use anyhow::{bail, Context, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
/// Held while a history operation runs; removes the lock file when dropped.
pub(crate) struct HistoryLock {
    lock_path: PathBuf,
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.lock_path) {
            tracing::debug!(
                lock = %self.lock_path.display(),
                error = %error,
                "history lock already gone"
            );
        }
    }
}

fn lock_path_for(history_path: &Path) -> PathBuf {
    let mut name = history_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    history_path.with_file_name(name)
}

/// Locks `history_path` by creating `<file>.lock` next to it.
///
/// A lock older than `stale_after` is treated as abandoned and reclaimed;
/// `Duration::ZERO` disables reclaiming.
pub(crate) fn lock_history_file(
    history_path: &Path,
    timeout: Duration,
    stale_after: Duration,
) -> Result<HistoryLock> {
    let lock_path = lock_path_for(history_path);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create history directory {}", parent.display())
            })?;
        }
    }

    let started = Instant::now();
    loop {
        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                return Ok(HistoryLock { lock_path });
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                if stale_after > Duration::ZERO && reclaim_if_stale(&lock_path, stale_after) {
                    tracing::warn!(
                        history = %history_path.display(),
                        "reclaimed abandoned history lock"
                    );
                    continue;
                }
                if started.elapsed() >= timeout {
                    tracing::warn!(
                        history = %history_path.display(),
                        timeout_ms = timeout.as_millis() as u64,
                        "history file is locked by another process"
                    );
                    bail!(
                        "history file {} is locked by another process ({} still present after {} ms)",
                        history_path.display(),
                        lock_path.display(),
                        timeout.as_millis()
                    );
                }
                thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to lock history file {}", history_path.display())
                });
            }
        }
    }
}

fn reclaim_if_stale(lock_path: &Path, stale_after: Duration) -> bool {
    let Ok(modified) = fs::metadata(lock_path).and_then(|metadata| metadata.modified()) else {
        return false;
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    age >= stale_after && fs::remove_file(lock_path).is_ok()
}
