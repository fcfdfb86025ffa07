//! Keyed in-memory stores with per-key locks.
//!
//! Each store maps a string key (session or user id) to its own
//! `Arc<Mutex<T>>`. The outer map lock is held only for lookup, creation
//! and removal; all real work happens under the per-key lock, so
//! operations on different keys never contend and operations on the same
//! key are linearizable.

use crate::context::ConversationContext;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Generic keyed store.
pub struct KeyedStore<T> {
    inner: Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T> std::fmt::Debug for KeyedStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedStore")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> Default for KeyedStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> KeyedStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<T>>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Existing entry for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<Mutex<T>>> {
        self.map().get(key).cloned()
    }

    /// Entry for `key`, created with `init` when absent.
    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> T) -> Arc<Mutex<T>> {
        let mut map = self.map();
        map.entry(key.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Remove the entry for `key`. Returns true when something was removed.
    pub fn remove(&self, key: &str) -> bool {
        self.map().remove(key).is_some()
    }

    /// All current keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.map().keys().cloned().collect()
    }

    /// All current entries as `(key, value)` pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Arc<Mutex<T>>)> {
        self.map()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// True when the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

impl KeyedStore<ConversationContext> {
    /// Session ids belonging to `user_id`, or every session when `None`.
    #[must_use]
    pub fn sessions_for(&self, user_id: Option<&str>) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(_, entry)| match user_id {
                Some(user_id) => {
                    let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                    ctx.user_id == user_id
                }
                None => true,
            })
            .map(|(key, _)| key)
            .collect()
    }

    /// The user's most recently updated session context.
    #[must_use]
    pub fn latest_for_user(&self, user_id: &str) -> Option<Arc<Mutex<ConversationContext>>> {
        let mut latest: Option<(chrono::DateTime<Utc>, Arc<Mutex<ConversationContext>>)> = None;
        for (_, entry) in self.entries() {
            let updated_at = {
                let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                if ctx.user_id != user_id {
                    continue;
                }
                ctx.updated_at
            };
            let newer = latest
                .as_ref()
                .is_none_or(|(current, _)| updated_at > *current);
            if newer {
                latest = Some((updated_at, entry));
            }
        }
        latest.map(|(_, entry)| entry)
    }

    /// Remove contexts idle longer than `idle_ttl_secs`.
    ///
    /// The outer lock is held only to snapshot the entry list and to
    /// remove each stale key; idleness is checked under per-key locks.
    /// Returns the removed session ids.
    pub fn evict_idle(&self, idle_ttl_secs: u64) -> Vec<String> {
        let now = Utc::now();
        let mut stale = Vec::new();
        for (key, entry) in self.entries() {
            let idle_secs = {
                let ctx = entry.lock().unwrap_or_else(|e| e.into_inner());
                (now - ctx.updated_at).num_seconds()
            };
            if idle_secs >= 0 && idle_secs as u64 > idle_ttl_secs {
                stale.push(key);
            }
        }
        for key in &stale {
            self.remove(key);
        }
        stale
    }
}
