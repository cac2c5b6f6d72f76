//! Process-scoped advisory locks.
//!
//! Acquisition polls a stale-purged name table at a short interval until the
//! name frees up, bounded by a maximum wait. This serializes callers inside
//! one process only; cross-process coordination is the Redis tier's job.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use cachette_backend::{LOCK_NAME_PREFIX, LockError, LockHandle};

/// Polling interval while a lock is held by someone else.
pub(crate) const DEFAULT_LOCK_POLL: Duration = Duration::from_millis(10);
/// Bound on the total acquisition wait.
pub(crate) const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct LockEntry {
    token: String,
    expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) struct LockTable {
    locks: DashMap<String, LockEntry>,
    poll: Duration,
    max_wait: Duration,
}

impl LockTable {
    pub(crate) fn new(poll: Duration, max_wait: Duration) -> Self {
        LockTable {
            locks: DashMap::new(),
            poll,
            max_wait,
        }
    }

    /// Drops every expired entry so abandoned holders cannot wedge waiters.
    fn purge_stale(&self) {
        let now = Utc::now();
        self.locks.retain(|_, entry| entry.expires_at > now);
    }

    pub(crate) async fn lock(
        &self,
        name: &str,
        ttl: Duration,
        retry: bool,
    ) -> Result<LockHandle, LockError> {
        let started = tokio::time::Instant::now();
        let mut attempts: u32 = 0;
        loop {
            self.purge_stale();
            attempts += 1;

            let acquired = match self.locks.entry(name.to_owned()) {
                Entry::Vacant(slot) => {
                    let token = Uuid::new_v4().to_string();
                    let expires_at = Utc::now()
                        + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
                    slot.insert(LockEntry {
                        token: token.clone(),
                        expires_at,
                    });
                    Some(LockHandle::new(name, token, expires_at))
                }
                Entry::Occupied(_) => None,
            };

            if let Some(handle) = acquired {
                return Ok(handle);
            }
            if !retry {
                return Err(LockError::Unavailable {
                    name: name.to_owned(),
                    attempts,
                });
            }
            if started.elapsed() >= self.max_wait {
                return Err(LockError::Timeout {
                    name: name.to_owned(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    /// Releases a handle. Expired handles are a no-op: the name may already
    /// belong to another holder.
    pub(crate) fn unlock(&self, handle: LockHandle) {
        if handle.is_expired() {
            return;
        }
        self.locks
            .remove_if(handle.name(), |_, entry| entry.token == handle.token());
    }

    /// Scans live lock names for `lock__{prefix}` matches.
    ///
    /// The table is small and local, so a full scan is fine here.
    pub(crate) fn has_lock(&self, prefix: &str) -> bool {
        self.purge_stale();
        let needle = format!("{LOCK_NAME_PREFIX}{prefix}");
        self.locks.iter().any(|entry| entry.key().starts_with(&needle))
    }
}
