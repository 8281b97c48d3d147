//! SQLite-backed tile store.
//!
//! One row per (zoom, x, y) with a PNG blob column, the addressing used by
//! SQLite tile caches. The primary key doubles as the enumeration index, so
//! `list_populated` never scans blobs. A single connection guarded by a
//! mutex serializes writes; SQLite's busy timeout covers contention from
//! other processes on the same file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::trace;

use super::{StoreError, TileStore};
use crate::coord::TileKey;
use crate::tile::TileImage;

/// Default busy timeout for a held database lock.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tile store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (and create if missing) a tile database at `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::create_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a tile database with a caller-specified busy timeout.
    ///
    /// The timeout bounds how long any single operation blocks on a lock
    /// held by another writer before failing with a retryable error.
    pub fn create_with_timeout(
        path: impl Into<PathBuf>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS tiles (
                 zoom INTEGER NOT NULL,
                 x    INTEGER NOT NULL,
                 y    INTEGER NOT NULL,
                 data BLOB NOT NULL,
                 PRIMARY KEY (zoom, x, y)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TileStore for SqliteStore {
    fn get(&self, key: &TileKey) -> Result<Option<TileImage>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM tiles WHERE zoom = ?1 AND x = ?2 AND y = ?3",
                params![key.zoom, key.x, key.y],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            None => Ok(None),
            Some(bytes) => TileImage::from_png(&bytes)
                .map(Some)
                .map_err(|e| StoreError::CorruptTile { key: *key, source: e }),
        }
    }

    fn put(&self, key: &TileKey, tile: &TileImage) -> Result<(), StoreError> {
        let data = tile
            .to_png()
            .map_err(|e| StoreError::Encode { key: *key, source: e })?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tiles (zoom, x, y, data) VALUES (?1, ?2, ?3, ?4)",
            params![key.zoom, key.x, key.y, data],
        )?;
        trace!(tile = %key, bytes = data.len(), "wrote tile row");
        Ok(())
    }

    fn exists(&self, key: &TileKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM tiles WHERE zoom = ?1 AND x = ?2 AND y = ?3",
                params![key.zoom, key.x, key.y],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete(&self, key: &TileKey) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM tiles WHERE zoom = ?1 AND x = ?2 AND y = ?3",
            params![key.zoom, key.x, key.y],
        )?;
        Ok(affected > 0)
    }

    fn list_populated(&self, zoom: u8) -> Result<Vec<TileKey>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT x, y FROM tiles WHERE zoom = ?1 ORDER BY x, y")?;
        let keys = stmt
            .query_map(params![zoom], |row| {
                Ok(TileKey::new(zoom, row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn zoom_levels(&self) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT zoom FROM tiles ORDER BY zoom")?;
        let zooms = stmt
            .query_map([], |row| row.get::<_, u8>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(zooms)
    }
}
