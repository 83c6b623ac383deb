//! Link persistence with expiry
//!
//! Two backends implement the same contract: an in-memory map for the
//! ephemeral standalone proxy, and an embedded SQLite database for the
//! shared proxy, whose links must survive process restarts and be visible
//! to every cooperating process on the host.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// A registered download link
///
/// The credential is referenced by name, never embedded; resolution looks
/// the key up in the proxy's vault at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    /// Opaque public token
    pub token: String,
    /// Internal document identifier at the upstream
    pub document_id: String,
    /// Exact upstream URL serving the document bytes
    pub upstream_url: Url,
    /// Name of the credential used for the upstream fetch
    pub credential_ref: String,
    /// Human-readable filename for Content-Disposition
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Successful resolutions served so far (observability only)
    pub consumption_count: u64,
}

impl DownloadLink {
    pub fn new(
        token: String,
        document_id: String,
        upstream_url: Url,
        credential_ref: String,
        filename: String,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let ttl_secs = ttl.as_secs().max(1);
        Self {
            token,
            document_id,
            upstream_url,
            credential_ref,
            filename,
            created_at,
            expires_at: created_at + chrono::Duration::seconds(ttl_secs as i64),
            consumption_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of resolving a token against the store
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Link exists and is within its lifetime
    Found(DownloadLink),
    /// Link existed but its lifetime has elapsed
    Expired,
    /// Token was never registered here
    NotFound,
}

/// Keyed link persistence
pub trait LinkStore: Send + Sync {
    /// Insert or replace a link row
    fn insert(&self, link: &DownloadLink) -> Result<()>;

    /// Look up a token, distinguishing expired from never-existed
    fn resolve(&self, token: &str) -> Result<Resolution>;

    /// Count one successful resolution against a link
    fn record_consumption(&self, token: &str) -> Result<()>;

    /// Delete rows past their expiry; returns the number removed
    fn sweep(&self) -> Result<usize>;

    /// Number of live rows (monitoring)
    fn len(&self) -> Result<usize>;
}

fn check_invariants(link: &DownloadLink) -> Result<()> {
    if link.expires_at <= link.created_at {
        return Err(Error::Validation(
            "expires_at must be after created_at".to_string(),
        ));
    }
    if link.token.is_empty() {
        return Err(Error::Validation("token cannot be empty".to_string()));
    }
    Ok(())
}

/// In-memory store for the standalone proxy
///
/// Expired entries are evicted lazily on first post-expiry access; the
/// sweep handles the rest.
#[derive(Default)]
pub struct MemoryStore {
    links: RwLock<HashMap<String, DownloadLink>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinkStore for MemoryStore {
    fn insert(&self, link: &DownloadLink) -> Result<()> {
        check_invariants(link)?;
        self.links.write().insert(link.token.clone(), link.clone());
        Ok(())
    }

    fn resolve(&self, token: &str) -> Result<Resolution> {
        let now = Utc::now();
        let mut links = self.links.write();
        match links.get(token) {
            None => Ok(Resolution::NotFound),
            Some(link) if link.is_expired(now) => {
                links.remove(token);
                Ok(Resolution::Expired)
            }
            Some(link) => Ok(Resolution::Found(link.clone())),
        }
    }

    fn record_consumption(&self, token: &str) -> Result<()> {
        if let Some(link) = self.links.write().get_mut(token) {
            link.consumption_count += 1;
        }
        Ok(())
    }

    fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut links = self.links.write();
        let before = links.len();
        links.retain(|_, link| !link.is_expired(now));
        Ok(before - links.len())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.links.read().len())
    }
}

/// SQLite-backed store for the shared proxy
///
/// The connection is serialized behind a mutex; every operation is a point
/// lookup or single-row write, so contention stays negligible next to the
/// upstream fetch.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the link database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS links (
                token             TEXT PRIMARY KEY,
                document_id       TEXT NOT NULL,
                upstream_url      TEXT NOT NULL,
                credential_ref    TEXT NOT NULL,
                filename          TEXT NOT NULL,
                created_at        INTEGER NOT NULL,
                expires_at        INTEGER NOT NULL,
                consumption_count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_links_expires_at ON links(expires_at)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<(DownloadLink, i64)> {
        let url_text: String = row.get(2)?;
        let created_secs: i64 = row.get(5)?;
        let expires_secs: i64 = row.get(6)?;
        let upstream_url = Url::parse(&url_text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?;
        let link = DownloadLink {
            token: row.get(0)?,
            document_id: row.get(1)?,
            upstream_url,
            credential_ref: row.get(3)?,
            filename: row.get(4)?,
            created_at: DateTime::from_timestamp(created_secs, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(expires_secs, 0).unwrap_or_default(),
            consumption_count: row.get::<_, i64>(7)? as u64,
        };
        Ok((link, expires_secs))
    }
}

impl LinkStore for SqliteStore {
    fn insert(&self, link: &DownloadLink) -> Result<()> {
        check_invariants(link)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO links
             (token, document_id, upstream_url, credential_ref, filename,
              created_at, expires_at, consumption_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                link.token,
                link.document_id,
                link.upstream_url.as_str(),
                link.credential_ref,
                link.filename,
                link.created_at.timestamp(),
                link.expires_at.timestamp(),
                link.consumption_count as i64,
            ],
        )?;
        Ok(())
    }

    fn resolve(&self, token: &str) -> Result<Resolution> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT token, document_id, upstream_url, credential_ref, filename,
                        created_at, expires_at, consumption_count
                 FROM links WHERE token = ?1",
                params![token],
                Self::row_to_link,
            )
            .optional()?;

        match row {
            None => Ok(Resolution::NotFound),
            Some((_, expires_secs)) if expires_secs <= Utc::now().timestamp() => {
                Ok(Resolution::Expired)
            }
            Some((link, _)) => Ok(Resolution::Found(link)),
        }
    }

    fn record_consumption(&self, token: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE links SET consumption_count = consumption_count + 1 WHERE token = ?1",
            params![token],
        )?;
        Ok(())
    }

    fn sweep(&self) -> Result<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM links WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(removed)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::random_token;

    fn sample_link(ttl: Duration) -> DownloadLink {
        DownloadLink::new(
            random_token(),
            "doc-123".to_string(),
            Url::parse("https://upstream.example/documents/doc-123/download").unwrap(),
            "primary".to_string(),
            "decision_2024.pdf".to_string(),
            ttl,
        )
    }

    fn expired_link() -> DownloadLink {
        let mut link = sample_link(Duration::from_secs(60));
        link.created_at = Utc::now() - chrono::Duration::seconds(120);
        link.expires_at = Utc::now() - chrono::Duration::seconds(60);
        link
    }

    #[test]
    fn test_memory_register_resolve() {
        let store = MemoryStore::new();
        let link = sample_link(Duration::from_secs(60));
        store.insert(&link).unwrap();

        match store.resolve(&link.token).unwrap() {
            Resolution::Found(found) => {
                assert_eq!(found.document_id, "doc-123");
                assert_eq!(found.filename, "decision_2024.pdf");
            }
            other => panic!("expected Found, got {:?}", other),
        }

        assert!(matches!(
            store.resolve("no-such-token").unwrap(),
            Resolution::NotFound
        ));
    }

    #[test]
    fn test_memory_expired_then_evicted() {
        let store = MemoryStore::new();
        let link = expired_link();
        let token = link.token.clone();
        store.insert(&link).unwrap();

        // First post-expiry access reports Expired and evicts
        assert!(matches!(store.resolve(&token).unwrap(), Resolution::Expired));
        assert!(matches!(store.resolve(&token).unwrap(), Resolution::NotFound));
    }

    #[test]
    fn test_memory_sweep() {
        let store = MemoryStore::new();
        store.insert(&sample_link(Duration::from_secs(60))).unwrap();
        store.insert(&expired_link()).unwrap();
        store.insert(&expired_link()).unwrap();

        assert_eq!(store.sweep().unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_invariant_rejects_backwards_expiry() {
        let store = MemoryStore::new();
        let mut link = sample_link(Duration::from_secs(60));
        link.expires_at = link.created_at;
        assert!(store.insert(&link).is_err());
    }

    #[test]
    fn test_consumption_is_idempotent_observation() {
        let store = MemoryStore::new();
        let link = sample_link(Duration::from_secs(60));
        store.insert(&link).unwrap();

        store.record_consumption(&link.token).unwrap();
        store.record_consumption(&link.token).unwrap();

        // Still resolvable after consumption; count is observability only
        match store.resolve(&link.token).unwrap() {
            Resolution::Found(found) => assert_eq!(found.consumption_count, 2),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_register_resolve_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = sample_link(Duration::from_secs(60));
        store.insert(&link).unwrap();

        match store.resolve(&link.token).unwrap() {
            Resolution::Found(found) => {
                assert_eq!(found.token, link.token);
                assert_eq!(found.upstream_url, link.upstream_url);
                assert_eq!(found.credential_ref, "primary");
                assert_eq!(found.expires_at.timestamp(), link.expires_at.timestamp());
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_expired_persists_until_sweep() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = expired_link();
        store.insert(&link).unwrap();

        // Rows survive until the sweep, so expired stays distinguishable
        assert!(matches!(store.resolve(&link.token).unwrap(), Resolution::Expired));
        assert!(matches!(store.resolve(&link.token).unwrap(), Resolution::Expired));

        assert_eq!(store.sweep().unwrap(), 1);
        assert!(matches!(store.resolve(&link.token).unwrap(), Resolution::NotFound));
    }

    #[test]
    fn test_sqlite_consumption_count() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = sample_link(Duration::from_secs(60));
        store.insert(&link).unwrap();

        store.record_consumption(&link.token).unwrap();
        store.record_consumption(&link.token).unwrap();
        store.record_consumption(&link.token).unwrap();

        match store.resolve(&link.token).unwrap() {
            Resolution::Found(found) => assert_eq!(found.consumption_count, 3),
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_upsert_replaces_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut link = sample_link(Duration::from_secs(60));
        store.insert(&link).unwrap();

        link.filename = "renamed.pdf".to_string();
        store.insert(&link).unwrap();

        assert_eq!(store.len().unwrap(), 1);
        match store.resolve(&link.token).unwrap() {
            Resolution::Found(found) => assert_eq!(found.filename, "renamed.pdf"),
            other => panic!("expected Found, got {:?}", other),
        }
    }
}
