//! SQLite cache of JSON-RPC responses for calls pinned to a block.

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Content-addressed response cache. Key = SHA-256 of the normalized `{method, params}` JSON.
pub struct ResponseCache {
    conn: Mutex<Connection>,
}

impl ResponseCache {
    /// Open or create cache at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS rpc_responses (
                key TEXT PRIMARY KEY,
                method TEXT NOT NULL,
                response TEXT NOT NULL,
                created_utc INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// serde_json maps keep keys sorted, so equal requests serialize identically.
    pub fn key_for(method: &str, params: &serde_json::Value) -> Result<String, CacheError> {
        let normalized = serde_json::to_string(&serde_json::json!({
            "method": method,
            "params": params,
        }))?;
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Io(std::io::Error::other(e.to_string())))
    }

    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT response FROM rpc_responses WHERE key = ?1",
                [key],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        drop(conn);
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    pub fn put(
        &self,
        key: &str,
        method: &str,
        response: &serde_json::Value,
    ) -> Result<(), CacheError> {
        let created = time::OffsetDateTime::now_utc().unix_timestamp();
        let body = serde_json::to_string(response)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO rpc_responses (key, method, response, created_utc) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![key, method, body, created],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64, CacheError> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM rpc_responses", [], |r| r.get(0))?;
        Ok(u64::try_from(n).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    #[test]
    fn key_ignores_object_key_order() {
        let a = ResponseCache::key_for("eth_call", &json!([{"to": "0x1", "data": "0x2"}, "0x10"]))
            .unwrap();
        let b = ResponseCache::key_for("eth_call", &json!([{"data": "0x2", "to": "0x1"}, "0x10"]))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let c = ResponseCache::key_for("eth_call", &json!([{"to": "0x1", "data": "0x2"}, "0x11"]))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn put_then_get() {
        let tmp = NamedTempFile::new().unwrap();
        let cache = ResponseCache::open(tmp.path()).unwrap();
        assert!(cache.is_empty().unwrap());
        let key = ResponseCache::key_for("eth_call", &json!(["x"])).unwrap();
        cache.put(&key, "eth_call", &json!("0xabc")).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(json!("0xabc")));
        assert!(cache.get("missing").unwrap().is_none());
        assert_eq!(cache.len().unwrap(), 1);
    }
}
