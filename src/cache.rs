//! SQLite-backed cache for finalized item collections.
//!
//! Deriving the collection draws random numbers (shuffles, control
//! corruption), so rebuilding on every start would show raters a different
//! corpus after each restart. The finalized collection is stored under a
//! fingerprint of the source file and derivation settings and reused until
//! either changes.

use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ItemMode;
use crate::record::AnnotationItem;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct SqliteCorpusCache {
    path: PathBuf,
    conn: Connection,
}

impl SqliteCorpusCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA synchronous=NORMAL; \
             CREATE TABLE IF NOT EXISTS corpus_cache ( \
               fingerprint TEXT PRIMARY KEY, \
               mode TEXT NOT NULL, \
               item_count INTEGER NOT NULL, \
               payload TEXT NOT NULL, \
               created_at INTEGER NOT NULL, \
               updated_at INTEGER NOT NULL, \
               hit_count INTEGER NOT NULL DEFAULT 0 \
             );",
        )?;
        Ok(Self { path, conn })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("SENSE_CACHE_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from(".sense_corpus_cache.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_exclusive(&self) -> Result<CacheLock, CacheError> {
        CacheLock::new(&self.path)
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<Vec<AnnotationItem>>, CacheError> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM corpus_cache WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let items: Vec<AnnotationItem> = serde_json::from_str(&payload)?;
        self.conn.execute(
            "UPDATE corpus_cache \
             SET hit_count = hit_count + 1, updated_at = ?1 \
             WHERE fingerprint = ?2",
            params![now_epoch(), fingerprint],
        )?;
        Ok(Some(items))
    }

    pub fn put(
        &self,
        fingerprint: &str,
        mode: ItemMode,
        items: &[AnnotationItem],
    ) -> Result<(), CacheError> {
        let payload = serde_json::to_string(items)?;
        let mode = match mode {
            ItemMode::Single => "single",
            ItemMode::Pair => "pair",
        };
        let now = now_epoch();
        self.conn.execute(
            "INSERT INTO corpus_cache ( \
                fingerprint, mode, item_count, payload, created_at, updated_at \
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(fingerprint) DO UPDATE SET \
                mode = excluded.mode, \
                item_count = excluded.item_count, \
                payload = excluded.payload, \
                updated_at = excluded.updated_at",
            params![fingerprint, mode, items.len() as i64, payload, now, now],
        )?;
        Ok(())
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, mode, item_count, created_at, updated_at, hit_count \
             FROM corpus_cache ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(CacheEntry {
                fingerprint: row.get(0)?,
                mode: row.get(1)?,
                item_count: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
                hit_count: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Keep the `max_rows` most recently used entries.
    pub fn prune(&self, max_rows: usize) -> Result<CachePruneStats, CacheError> {
        let deleted = self.conn.execute(
            "DELETE FROM corpus_cache WHERE fingerprint IN ( \
                SELECT fingerprint FROM corpus_cache \
                ORDER BY updated_at DESC LIMIT -1 OFFSET ?1 \
             )",
            params![max_rows as i64],
        )?;
        let remaining: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM corpus_cache", [], |row| row.get(0))?;
        Ok(CachePruneStats {
            deleted,
            remaining: remaining.max(0) as usize,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub mode: String,
    pub item_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub hit_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

/// Exclusive advisory lock held while a collection is derived and stored.
#[derive(Debug)]
pub struct CacheLock {
    _file: std::fs::File,
}

impl CacheLock {
    fn new(db_path: &Path) -> Result<Self, CacheError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}

/// Fingerprint over ordered fields, separated so that field boundaries
/// cannot collide.
pub fn hash_fields(fields: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (idx, field) in fields.iter().enumerate() {
        if idx > 0 {
            hasher.update(b"|");
        }
        hasher.update(blake3::hash(field).as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
