//! Keyed single-flight registry.
//!
//! Concurrent callers asking for the same key while an operation is running
//! all await that one operation and observe the identical result. The
//! operation runs on its own task, so it completes even if every caller goes
//! away, and its entry is removed on completion whatever the outcome.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::task::JoinError;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Process-local registry of operations in flight, keyed by `K`.
pub struct InFlight<K, T, E>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, SharedOutcome<T, E>>>,
}

impl<K, T, E> Clone for InFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, T, E> Default for InFlight<K, T, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }
}

/// Removes the entry when the operation task ends, including by panic.
struct ClearOnDrop<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, V>>,
    key: Option<K>,
}

impl<K, V> Drop for ClearOnDrop<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.entries.remove(&key);
        }
    }
}

/// Whether [`InFlight::join_or_start`] started the operation or joined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    Started,
    Joined,
}

impl<K, T, E> InFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Await the operation running for `key`, starting `operation` if none is.
    ///
    /// Check-then-insert happens under the map's shard lock, so two callers
    /// can never both start an operation for the same key.
    pub async fn join_or_start<F, Fut>(&self, key: K, operation: F) -> (Participation, Result<T, E>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (participation, outcome) = match self.entries.entry(key.clone()) {
            Entry::Occupied(running) => (Participation::Joined, running.get().clone()),
            Entry::Vacant(slot) => {
                let entries = Arc::clone(&self.entries);
                let work = operation();
                let task = tokio::spawn(async move {
                    let _clear = ClearOnDrop {
                        entries,
                        key: Some(key),
                    };
                    work.await
                });
                let outcome = async move { task.await.unwrap_or_else(|e| Err(E::from(e))) }
                    .boxed()
                    .shared();
                slot.insert(outcome.clone());
                (Participation::Started, outcome)
            }
        };

        (participation, outcome.await)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
