//! Run-scoped shared context
//!
//! One [`ClusterContext`] lives for one orchestration run. Every phase
//! instance gets a handle to the same map. All access goes through a single
//! async mutex, and the read-modify-write helpers hold it across their
//! constructor so racing hosts cannot build the same entry twice.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

type Entry = Arc<dyn Any + Send + Sync>;

/// Shared key/value map for one run
#[derive(Clone, Default)]
pub struct ClusterContext {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ClusterContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup. A value of a different type reads as absent.
    pub async fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.lock().await;
        entries.get(key).cloned().and_then(|v| v.downcast::<T>().ok())
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.entries
            .lock()
            .await
            .insert(key.into(), value.clone() as Entry);
        value
    }

    /// Remove an entry, returning it when it had type `T`
    pub async fn remove<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.entries.lock().await.remove(key);
        removed.and_then(|v| v.downcast::<T>().ok())
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Return the cached value, or build and cache it
    ///
    /// The lock is held while `init` runs. A failed `init` leaves the key
    /// unset.
    pub async fn get_or_try_insert_with<T, E, F, Fut>(&self, key: &str, init: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key).cloned().and_then(|v| v.downcast::<T>().ok()) {
            return Ok(existing);
        }
        let value = Arc::new(init().await?);
        entries.insert(key.to_string(), value.clone() as Entry);
        Ok(value)
    }

    /// Replace an entry, handing the previous value to `build` first
    ///
    /// `build` is responsible for releasing whatever the previous value holds.
    /// On error the previous value has already been taken out, so the key is
    /// left unset.
    pub async fn replace_with<T, E, F, Fut>(&self, key: &str, build: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce(Option<Arc<T>>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut entries = self.entries.lock().await;
        let previous = entries.remove(key).and_then(|v| v.downcast::<T>().ok());
        let value = Arc::new(build(previous).await?);
        entries.insert(key.to_string(), value.clone() as Entry);
        Ok(value)
    }
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.entries.try_lock() {
            Ok(entries) => f
                .debug_struct("ClusterContext")
                .field("keys", &entries.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.debug_struct("ClusterContext").finish_non_exhaustive(),
        }
    }
}
