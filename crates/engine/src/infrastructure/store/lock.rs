//! Advisory exclusive file locks for the write path.
//!
//! One lock serializes writers per state file. Reads never lock; they may
//! observe a stale version, which clients reconcile via
//! `snapshot_version`. The guard releases on drop so every exit path,
//! including errors, unlocks.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use fs2::FileExt;
use rand::Rng;

use super::StoreError;

const RETRY_BASE_MS: u64 = 20;
const RETRY_JITTER_MS: u64 = 20;

/// Holds an advisory exclusive lock until dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: std::fs::File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Acquire an exclusive lock on `lock_path`, waiting up to `timeout`.
///
/// Contention is retried with a short jittered sleep; exceeding the
/// timeout is a transient failure the handler surfaces as "try again".
pub async fn acquire_exclusive(
    lock_path: &Path,
    timeout: Duration,
) -> Result<FileLockGuard, StoreError> {
    let io_err = |e: std::io::Error| StoreError::Io {
        path: lock_path.display().to_string(),
        source: e,
    };

    if let Some(parent) = lock_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
        .map_err(io_err)?;

    let deadline = tokio::time::Instant::now() + timeout;
    let contended_kind = fs2::lock_contended_error().kind();

    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(FileLockGuard { file }),
            Err(e) if e.kind() == contended_kind => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(StoreError::LockTimeout {
                        path: lock_path.display().to_string(),
                    });
                }
                let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_MS + jitter)).await;
            }
            Err(e) => return Err(io_err(e)),
        }
    }
}
