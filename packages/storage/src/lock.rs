//! Cross-process file locks.
//!
//! A lock on `target` is the file `{target}.lock`, created with
//! `create_new` so exactly one process can hold it. The file records the
//! holder so a stuck lock can be diagnosed by hand, and is removed when
//! the [`LockGuard`] is released or dropped.
//!
//! Acquisition polls until the lock is free or the wait budget runs out.
//! A process that crashes while holding a lock leaves the file behind;
//! with [`LockOptions::stale_after`] set, a lock file older than that is
//! treated as abandoned and removed.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StorageError;
use crate::paths::{ensure_parent, with_suffix};

/// Default interval between acquisition attempts.
pub const DEFAULT_POLL: Duration = Duration::from_millis(200);

/// Default maximum wait for a lock.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Suffix appended to the protected path to name its lock file.
pub const LOCK_SUFFIX: &str = ".lock";

/// Timing of lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Interval between acquisition attempts.
    pub poll: Duration,
    /// Maximum total wait before giving up.
    pub timeout: Duration,
    /// Age after which an existing lock file is considered abandoned.
    /// `None` never breaks a lock.
    pub stale_after: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            poll: DEFAULT_POLL,
            timeout: DEFAULT_TIMEOUT,
            stale_after: None,
        }
    }
}

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Unique holder ID (`{pid}-{uuid}`).
    pub holder_id: String,
    /// Process ID of the holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockHolder {
    fn current() -> Self {
        let pid = std::process::id();
        Self {
            holder_id: format!("{pid}-{}", uuid::Uuid::new_v4()),
            pid,
            acquired_at: Utc::now(),
        }
    }
}

/// A lock on one path.
#[derive(Debug, Clone)]
pub struct FileLock {
    lock_path: PathBuf,
    options: LockOptions,
}

impl FileLock {
    /// Creates a lock protecting `target` (lock file `{target}.lock`).
    #[must_use]
    pub fn for_target(target: &Path, options: LockOptions) -> Self {
        Self {
            lock_path: with_suffix(target, LOCK_SUFFIX),
            options,
        }
    }

    /// The lock file path.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// The acquisition options.
    #[must_use]
    pub const fn options(&self) -> LockOptions {
        self.options
    }

    /// Waits for and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the lock stays held for the
    /// whole timeout, or [`StorageError::Io`] if the lock file cannot be
    /// created for another reason.
    pub async fn acquire(&self) -> Result<LockGuard, StorageError> {
        ensure_parent(&self.lock_path)?;
        let started = Instant::now();

        loop {
            match self.try_create()? {
                Some(guard) => return Ok(guard),
                None => {
                    if self.break_if_stale() {
                        continue;
                    }

                    let waited = started.elapsed();
                    if waited >= self.options.timeout {
                        return Err(StorageError::LockTimeout {
                            path: self.lock_path.clone(),
                            waited,
                        });
                    }

                    log::trace!("Lock {} is held, waiting", self.lock_path.display());
                    tokio::time::sleep(self.options.poll).await;
                }
            }
        }
    }

    /// Creates the lock file. `Ok(None)` means someone else holds it.
    fn try_create(&self) -> Result<Option<LockGuard>, StorageError> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let holder = LockHolder::current();
        let written = serde_json::to_vec(&holder)
            .map_err(StorageError::from)
            .and_then(|bytes| file.write_all(&bytes).map_err(StorageError::from));

        if let Err(e) = written {
            let _ = std::fs::remove_file(&self.lock_path);
            return Err(e);
        }

        log::debug!(
            "Acquired lock {} ({})",
            self.lock_path.display(),
            holder.holder_id
        );

        Ok(Some(LockGuard {
            lock_path: self.lock_path.clone(),
            holder_id: holder.holder_id,
            released: false,
        }))
    }

    /// Removes the lock file if it is older than `stale_after`.
    fn break_if_stale(&self) -> bool {
        let Some(stale_after) = self.options.stale_after else {
            return false;
        };

        let age = std::fs::metadata(&self.lock_path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());

        match age {
            Some(age) if age >= stale_after => {
                let Ok(observed) = std::fs::read(&self.lock_path) else {
                    return false;
                };
                let holder: Option<LockHolder> = serde_json::from_slice(&observed).ok();
                log::warn!(
                    "Breaking stale lock {} (age {age:?}, holder {:?})",
                    self.lock_path.display(),
                    holder.map(|h| h.holder_id)
                );
                self.remove_if_unchanged(&observed)
            }
            _ => false,
        }
    }

    /// Removes the lock file only if it still holds `observed`.
    ///
    /// The file is first renamed to a private tombstone, so the check and
    /// the removal see the same file. If another process broke and re-took
    /// the lock in between, the tombstone holds its record and is linked
    /// back into place.
    fn remove_if_unchanged(&self, observed: &[u8]) -> bool {
        let tombstone = with_suffix(
            &self.lock_path,
            &format!(".stale-{}", uuid::Uuid::new_v4()),
        );
        if std::fs::rename(&self.lock_path, &tombstone).is_err() {
            return false;
        }

        let unchanged = std::fs::read(&tombstone).is_ok_and(|moved| moved == observed);
        if !unchanged {
            log::warn!(
                "Lock {} changed hands while being broken; restoring it",
                self.lock_path.display()
            );
            if let Err(e) = std::fs::hard_link(&tombstone, &self.lock_path) {
                log::warn!("Failed to restore lock {}: {e}", self.lock_path.display());
            }
        }

        let _ = std::fs::remove_file(&tombstone);
        unchanged
    }
}

/// Reads the holder recorded in a lock file, if it parses.
#[must_use]
pub fn read_holder(lock_path: &Path) -> Option<LockHolder> {
    let bytes = std::fs::read(lock_path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Proof of holding a [`FileLock`]. Releases the lock when dropped.
#[derive(Debug)]
pub struct LockGuard {
    lock_path: PathBuf,
    holder_id: String,
    released: bool,
}

impl LockGuard {
    /// This holder's unique ID.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Releases the lock now.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Only remove the file if it is still ours; a stale-lock breaker may
        // have replaced it.
        match read_holder(&self.lock_path) {
            Some(holder) if holder.holder_id != self.holder_id => {
                log::warn!(
                    "Lock {} was taken over by {}; leaving it in place",
                    self.lock_path.display(),
                    holder.holder_id
                );
            }
            _ => {
                if let Err(e) = std::fs::remove_file(&self.lock_path)
                    && e.kind() != ErrorKind::NotFound
                {
                    log::warn!("Failed to remove lock {}: {e}", self.lock_path.display());
                }
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove();
    }
}
