//! Durable storage seams (§4.1 named collection, §4.6 queue file, §6
//! "Persisted state layout"). Two collaborators are defined: `StateCollection`
//! for the client-side store and location hint, and `QueueStore` for the
//! hit queue's append-only log. Each is accessed from exactly one thread per
//! §5 ("Each uses its own serializer; no cross-file transaction required").
//!
//! An in-memory implementation backs every unit test; a `rusqlite`-backed
//! implementation is available behind the `sqlite` feature for on-device use,
//! following the teacher's own `sqlite` cargo feature split.

use crate::hit_queue::PersistedHit;
use std::collections::HashMap;
use std::sync::Mutex;

/// One row of the "edge" named collection (§6): a state-store entry or the
/// location hint, keyed by string, with an absolute wall-clock expiry.
#[derive(Clone, Debug)]
pub struct PersistedRow {
    pub key: String,
    pub value: String,
    pub expires_at_epoch_ms: i64,
}

pub trait StateCollection: Send + Sync {
    fn load(&self) -> Vec<PersistedRow>;
    fn put(&self, key: &str, value: &str, expires_at_epoch_ms: i64);
    fn delete(&self, key: &str);
    fn clear(&self);
}

#[derive(Default)]
pub struct InMemoryStateCollection {
    rows: Mutex<HashMap<String, PersistedRow>>,
}

impl InMemoryStateCollection {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateCollection for InMemoryStateCollection {
    fn load(&self) -> Vec<PersistedRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    fn put(&self, key: &str, value: &str, expires_at_epoch_ms: i64) {
        self.rows.lock().unwrap().insert(
            key.to_string(),
            PersistedRow {
                key: key.to_string(),
                value: value.to_string(),
                expires_at_epoch_ms,
            },
        );
    }

    fn delete(&self, key: &str) {
        self.rows.lock().unwrap().remove(key);
    }

    fn clear(&self) {
        self.rows.lock().unwrap().clear();
    }
}

/// The hit queue's append-only log (§4.6, §6 "Queue file"). `append` is
/// called on enqueue, `remove_head` when the head hit leaves the system
/// (success or fatal failure), `load_all` once at startup to resume an
/// in-flight queue across a process restart.
pub trait QueueStore: Send + Sync {
    fn load_all(&self) -> Vec<PersistedHit>;
    fn append(&self, hit: &PersistedHit);
    fn remove_head(&self);
    fn compact(&self, remaining: &[PersistedHit]);
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    hits: Mutex<Vec<PersistedHit>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for InMemoryQueueStore {
    fn load_all(&self) -> Vec<PersistedHit> {
        self.hits.lock().unwrap().clone()
    }

    fn append(&self, hit: &PersistedHit) {
        self.hits.lock().unwrap().push(hit.clone());
    }

    fn remove_head(&self) {
        let mut hits = self.hits.lock().unwrap();
        if !hits.is_empty() {
            hits.remove(0);
        }
    }

    fn compact(&self, remaining: &[PersistedHit]) {
        *self.hits.lock().unwrap() = remaining.to_vec();
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use rusqlite::{params, Connection};
    use std::sync::Mutex as StdMutex;

    /// `rusqlite`-backed named collection, mirroring the on-device
    /// persistence the teacher ships behind its own `sqlite` feature.
    pub struct SqliteStateCollection {
        conn: StdMutex<Connection>,
    }

    impl SqliteStateCollection {
        pub fn open(path: &str) -> anyhow::Result<Self> {
            let conn = Connection::open(path)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS edge_state (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    expires_at_epoch_ms INTEGER NOT NULL
                )",
                [],
            )?;
            Ok(Self { conn: StdMutex::new(conn) })
        }
    }

    impl StateCollection for SqliteStateCollection {
        fn load(&self) -> Vec<PersistedRow> {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn
                .prepare("SELECT key, value, expires_at_epoch_ms FROM edge_state")
                .expect("prepare load");
            stmt.query_map([], |row| {
                Ok(PersistedRow {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    expires_at_epoch_ms: row.get(2)?,
                })
            })
            .expect("query load")
            .filter_map(|r| r.ok())
            .collect()
        }

        fn put(&self, key: &str, value: &str, expires_at_epoch_ms: i64) {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO edge_state (key, value, expires_at_epoch_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at_epoch_ms = excluded.expires_at_epoch_ms",
                params![key, value, expires_at_epoch_ms],
            )
            .expect("put row");
        }

        fn delete(&self, key: &str) {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM edge_state WHERE key = ?1", params![key])
                .expect("delete row");
        }

        fn clear(&self) {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM edge_state", []).expect("clear rows");
        }
    }

    /// `rusqlite`-backed append-only hit log (§4.6, §6 "Queue file").
    /// Rows are ordered by an auto-incrementing rowid so `load_all` resumes
    /// the FIFO in enqueue order across a process restart.
    pub struct SqliteQueueStore {
        conn: StdMutex<Connection>,
    }

    impl SqliteQueueStore {
        pub fn open(path: &str) -> anyhow::Result<Self> {
            let conn = Connection::open(path)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS edge_queue (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    hit TEXT NOT NULL
                )",
                [],
            )?;
            Ok(Self { conn: StdMutex::new(conn) })
        }
    }

    impl QueueStore for SqliteQueueStore {
        fn load_all(&self) -> Vec<PersistedHit> {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT hit FROM edge_queue ORDER BY seq").expect("prepare load_all");
            stmt.query_map([], |row| row.get::<_, String>(0))
                .expect("query load_all")
                .filter_map(|r| r.ok())
                .filter_map(|json| serde_json::from_str(&json).ok())
                .collect()
        }

        fn append(&self, hit: &PersistedHit) {
            let json = serde_json::to_string(hit).expect("serialize hit");
            let conn = self.conn.lock().unwrap();
            conn.execute("INSERT INTO edge_queue (hit) VALUES (?1)", params![json])
                .expect("append hit");
        }

        fn remove_head(&self) {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM edge_queue WHERE seq = (SELECT MIN(seq) FROM edge_queue)",
                [],
            )
            .expect("remove head");
        }

        fn compact(&self, remaining: &[PersistedHit]) {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM edge_queue", []).expect("clear queue");
            for hit in remaining {
                let json = serde_json::to_string(hit).expect("serialize hit");
                conn.execute("INSERT INTO edge_queue (hit) VALUES (?1)", params![json])
                    .expect("compact insert");
            }
        }
    }
}
