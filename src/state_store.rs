use crate::clock::Clock;
use crate::persistence::StateCollection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn epoch_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One `state:store` handle payload entry (§3 StateEntry, §6 persisted
/// layout). `maxAge` is only meaningful at merge time; once stored we only
/// keep the absolute expiry so repeated merges never recompute it wrong.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateUpdate {
    pub key: String,
    pub value: String,
    pub max_age: i64,
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// The client-side store (C1): server-issued key/value entries echoed back
/// on subsequent requests until they expire. Reads observe a snapshot at
/// envelope-build time (§5 "Shared-resource policy"); writes only ever
/// happen from response parsing (§4.1) or Reset (§4.9).
pub struct StateStore {
    clock: Arc<dyn Clock>,
    collection: Box<dyn StateCollection>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl StateStore {
    /// Loads persisted rows, pruning anything whose wall-clock epoch expiry
    /// has already passed before the in-memory monotonic entry is created
    /// (§4.1 "On startup, expired entries are pruned").
    pub fn new(clock: Arc<dyn Clock>, collection: Box<dyn StateCollection>) -> Self {
        let now_instant = clock.now();
        let now_epoch = epoch_ms_now();
        let mut entries = HashMap::new();
        for row in collection.load() {
            let remaining_ms = row.expires_at_epoch_ms - now_epoch;
            if remaining_ms > 0 {
                entries.insert(
                    row.key,
                    Entry {
                        value: row.value,
                        expires_at: now_instant + Duration::from_millis(remaining_ms as u64),
                    },
                );
            } else {
                collection.delete(&row.key);
            }
        }
        Self {
            clock,
            collection,
            entries: Mutex::new(entries),
        }
    }

    /// Apply a batch of `state:store` updates in order (§4.1 merge,
    /// §8 law 5: later entries for the same key win, `maxAge == 0` deletes).
    pub fn merge(&self, updates: impl IntoIterator<Item = StateUpdate>) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        for update in updates {
            if update.max_age <= 0 {
                entries.remove(&update.key);
                self.collection.delete(&update.key);
            } else {
                let expires_at = now + Duration::from_secs(update.max_age as u64);
                entries.insert(
                    update.key.clone(),
                    Entry {
                        value: update.value.clone(),
                        expires_at,
                    },
                );
                let epoch_expiry = epoch_ms_now() + update.max_age * 1000;
                self.collection.put(&update.key, &update.value, epoch_expiry);
            }
        }
    }

    /// Non-expired entries, pruning expired ones as a side effect (§4.1).
    /// Order is unspecified; callers must not depend on it.
    pub fn active_entries(&self) -> Vec<StateUpdate> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|key, entry| {
            let alive = entry.expires_at > now;
            if !alive {
                self.collection.delete(key);
            }
            alive
        });
        entries
            .iter()
            .map(|(key, entry)| StateUpdate {
                key: key.clone(),
                value: entry.value.clone(),
                max_age: (entry.expires_at - now).as_secs() as i64,
            })
            .collect()
    }

    /// Reset (§4.9): drop every entry, in memory and on disk.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        self.collection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::persistence::InMemoryStateCollection;

    fn store() -> (StateStore, TestClock) {
        let clock = TestClock::new();
        let store = StateStore::new(Arc::new(clock.clone()), Box::new(InMemoryStateCollection::new()));
        (store, clock)
    }

    #[test]
    fn merge_keeps_last_write_and_honors_delete() {
        let (store, _clock) = store();
        store.merge(vec![
            StateUpdate {
                key: "k".into(),
                value: "v1".into(),
                max_age: 10,
            },
            StateUpdate {
                key: "k".into(),
                value: "v2".into(),
                max_age: 5,
            },
        ]);
        let active = store.active_entries();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].value, "v2");

        store.merge(vec![StateUpdate {
            key: "k".into(),
            value: String::new(),
            max_age: 0,
        }]);
        assert!(store.active_entries().is_empty());
    }

    #[test]
    fn expired_entries_are_pruned() {
        let (store, clock) = store();
        store.merge(vec![StateUpdate {
            key: "k".into(),
            value: "v".into(),
            max_age: 1,
        }]);
        assert_eq!(store.active_entries().len(), 1);
        clock.advance(Duration::from_secs(2));
        assert!(store.active_entries().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let (store, _clock) = store();
        store.merge(vec![StateUpdate {
            key: "k".into(),
            value: "v".into(),
            max_age: 100,
        }]);
        store.clear();
        assert!(store.active_entries().is_empty());
    }
}
