//! Per-profile memoization with single-flight initialization.

use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

type Slot<T, E> = Arc<OnceCell<Result<T, Arc<E>>>>;

/// Profile-keyed cache. Concurrent first lookups of one profile share a
/// single initialization and all observe its outcome, success or failure.
/// A failed slot is retired once settled, so later callers start a new flight.
pub struct ProfileCache<T, E> {
    slots: Mutex<FxHashMap<String, Slot<T, E>>>,
}

impl<T: Clone, E> ProfileCache<T, E> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    pub async fn get_or_try_init<F, Fut>(&self, profile: &str, init: F) -> Result<T, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        // The map lock only guards slot creation; initialization runs on the slot.
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(profile.to_string()).or_default().clone()
        };
        if slot.initialized() {
            tracing::debug!(profile, "cache hit");
        }
        let outcome = slot
            .get_or_init(|| async move { init().await.map_err(Arc::new) })
            .await;
        match outcome {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let e = Arc::clone(e);
                let mut slots = self.slots.lock().await;
                if slots.get(profile).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                    slots.remove(profile);
                }
                Err(e)
            }
        }
    }

    /// Number of profiles holding a value.
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|s| s.get().is_some_and(|r| r.is_ok()))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: Clone, E> Default for ProfileCache<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
