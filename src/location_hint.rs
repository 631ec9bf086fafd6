use crate::clock::Clock;
use crate::persistence::StateCollection;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Default TTL (§4.2) applied when the server omits `ttlSeconds` on a
/// `locationHint:result` handle.
pub const DEFAULT_TTL_SECONDS: i64 = 1800;

const COLLECTION_KEY: &str = "locationHint";

fn epoch_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

struct Hint {
    value: String,
    expires_at: Instant,
}

/// Location Hint Store (C2): a short-lived region token inserted into
/// request URLs (§4.3) and persisted with TTL (§4.2). Only the
/// `"EdgeNetwork"` scope is ever written here; callers filter other scopes
/// before calling `set`.
pub struct LocationHintStore {
    clock: Arc<dyn Clock>,
    collection: Box<dyn StateCollection>,
    hint: Mutex<Option<Hint>>,
}

impl LocationHintStore {
    pub fn new(clock: Arc<dyn Clock>, collection: Box<dyn StateCollection>) -> Self {
        let now_instant = clock.now();
        let now_epoch = epoch_ms_now();
        let mut hint = None;
        if let Some(row) = collection.load().into_iter().find(|r| r.key == COLLECTION_KEY) {
            let remaining_ms = row.expires_at_epoch_ms - now_epoch;
            if remaining_ms > 0 && !row.value.is_empty() {
                hint = Some(Hint {
                    value: row.value,
                    expires_at: now_instant + Duration::from_millis(remaining_ms as u64),
                });
            } else {
                collection.delete(COLLECTION_KEY);
            }
        }
        Self {
            clock,
            collection,
            hint: Mutex::new(hint),
        }
    }

    /// An empty or missing value clears the hint (§4.2, §8 law 6).
    pub fn set(&self, value: Option<String>, ttl_seconds: Option<i64>) {
        match value {
            None => self.clear(),
            Some(v) if v.is_empty() => self.clear(),
            Some(v) => {
                let ttl = ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS).max(0);
                let expires_at = self.clock.now() + Duration::from_secs(ttl as u64);
                *self.hint.lock().unwrap() = Some(Hint {
                    value: v.clone(),
                    expires_at,
                });
                self.collection
                    .put(COLLECTION_KEY, &v, epoch_ms_now() + ttl * 1000);
            }
        }
    }

    /// `None` if absent or expired (§4.2 "now >= expiresAt" treated as absent).
    pub fn get(&self) -> Option<String> {
        let now = self.clock.now();
        let mut slot = self.hint.lock().unwrap();
        let expired = matches!(&*slot, Some(h) if h.expires_at <= now);
        if expired {
            *slot = None;
            self.collection.delete(COLLECTION_KEY);
        }
        slot.as_ref().map(|h| h.value.clone())
    }

    pub fn clear(&self) {
        *self.hint.lock().unwrap() = None;
        self.collection.delete(COLLECTION_KEY);
    }
}
