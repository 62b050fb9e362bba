//! Sidecar lock files and atomic file replacement
//!
//! Writers on file-backed stores take an exclusive sidecar lock
//! (`<target>.lock`, created with `O_CREAT|O_EXCL` semantics) and replace
//! files through a temp-file rename, so readers never observe a partial
//! file and never need to lock.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::{sleep, Instant};

/// Poll interval while waiting on a held lock
pub const LOCK_POLL: Duration = Duration::from_millis(50);

/// Held sidecar lock. Removing the lock file happens on drop, on every
/// exit path.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path(target: &Path) -> PathBuf {
    sibling_with_suffix(target, ".lock")
}

fn tmp_path(target: &Path) -> PathBuf {
    sibling_with_suffix(target, ".tmp")
}

fn sibling_with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    target.with_file_name(name)
}

/// Acquire the sidecar lock for `target`, waiting up to `timeout`.
///
/// A missing parent directory is created and the acquisition retried; a
/// held lock is polled every [`LOCK_POLL`] until the deadline, after which
/// the call fails with [`Error::LockTimeout`].
pub async fn acquire(target: &Path, timeout: Duration) -> Result<LockGuard> {
    let path = lock_path(target);
    let deadline = Instant::now() + timeout;

    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok(LockGuard { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return Err(Error::LockTimeout(path.display().to_string()));
                }
                sleep(LOCK_POLL).await;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write `bytes` to `<path>.tmp` and rename onto `path`.
pub async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Run `critical` while holding the sidecar lock for `target`.
pub async fn with_lock<T, F, Fut>(target: &Path, timeout: Duration, critical: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let guard = acquire(target, timeout).await?;
    let result = critical().await;
    drop(guard);
    result
}
