//! # RepoLock
//!
//! Process-wide keyed mutex registry serializing all git operations against
//! the same logical repository. Every reconciler receives a clone of the same
//! registry at startup; no reconciler may clone/write/push a repository
//! without holding its lock for the duration of the git sequence.
//!
//! Entries are created lazily and never removed. The platform manages a
//! small, bounded set of repositories, so the leak is acceptable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed mutex registry for git repositories.
///
/// Cloning is cheap and shares the underlying lock table.
#[derive(Debug, Clone, Default)]
pub struct RepoLock {
    entries: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RepoLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable identity for a logical repository: normalized URL plus subpath,
    /// so monorepo-style packages under the same URL serialize independently.
    pub fn key(url: &str, path: &str) -> String {
        let url = url.trim_end_matches('/').trim_end_matches(".git");
        let url = match url.split_once("://") {
            Some((scheme, rest)) => {
                let (host, tail) = rest.split_once('/').unwrap_or((rest, ""));
                if tail.is_empty() {
                    format!("{scheme}://{}", host.to_lowercase())
                } else {
                    format!("{scheme}://{}/{tail}", host.to_lowercase())
                }
            }
            None => url.to_string(),
        };
        format!("{url}#{}", path.trim_matches('/'))
    }

    /// Acquire the lock for `key`, waiting if another reconcile holds it.
    ///
    /// The returned guard is owned so it can be held across await points;
    /// dropping it (normal return, error, or cancellation) releases the lock.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().expect("repo lock table poisoned");
            Arc::clone(
                entries
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        entry.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().expect("repo lock table poisoned").len()
    }
}
