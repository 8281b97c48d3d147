//! Tile store
//!
//! Abstraction over physical tile persistence, keyed by [`TileKey`]. The
//! builder, merge engine, and converter are backend-agnostic; every backend
//! must satisfy the same contract:
//!
//! - `put` overwrites silently and is safe to call concurrently for
//!   distinct keys; no cross-key transaction is provided.
//! - `list_populated` returns a snapshot; callers interleaving mutation and
//!   iteration over the same level must re-list.
//!
//! # Backends
//!
//! - [`DirectoryStore`]: `{root}/{zoom}/{x}/{y}.png` tree.
//! - [`SqliteStore`]: one row per key with a PNG blob column.
//! - [`MemoryStore`]: HashMap-backed, for tests and staging.

mod directory;
mod memory;
mod sqlite;

pub use directory::DirectoryStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

use crate::coord::TileKey;
use crate::tile::{TileImage, TileImageError};

/// Errors from tile store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem I/O failure. Retryable.
    #[error("Store I/O error at {key}: {source}")]
    Io {
        key: TileKey,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem I/O failure not tied to a single tile. Retryable.
    #[error("Store I/O error: {0}")]
    IoOther(#[from] std::io::Error),

    /// Database failure. Retryable only for lock contention.
    #[error("Store database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored payload is not a valid tile. Fatal.
    #[error("Corrupt tile {key}: {source}")]
    CorruptTile {
        key: TileKey,
        #[source]
        source: TileImageError,
    },

    /// A tile produced by the caller failed to encode. Fatal.
    #[error("Failed to encode tile {key}: {source}")]
    Encode {
        key: TileKey,
        #[source]
        source: TileImageError,
    },
}

impl StoreError {
    /// True if retrying the operation could succeed.
    ///
    /// Database errors are transient only when SQLite reports lock
    /// contention; a schema mismatch or a corrupt database fails the same
    /// way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Io { .. } | StoreError::IoOther(_) => true,
            StoreError::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy)
                    | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            StoreError::CorruptTile { .. } | StoreError::Encode { .. } => false,
        }
    }
}

/// Persistence contract shared by all tile store backends.
///
/// Implementations are `Send + Sync`; the pyramid builder writes distinct
/// keys from multiple worker threads.
pub trait TileStore: Send + Sync {
    /// Fetch a tile, or `None` if the key is not populated.
    fn get(&self, key: &TileKey) -> Result<Option<TileImage>, StoreError>;

    /// Write a tile, silently overwriting any existing entry.
    fn put(&self, key: &TileKey, tile: &TileImage) -> Result<(), StoreError>;

    /// True if the key is populated, without fetching pixel data.
    fn exists(&self, key: &TileKey) -> Result<bool, StoreError>;

    /// Remove a tile. Returns whether the key was populated.
    fn delete(&self, key: &TileKey) -> Result<bool, StoreError>;

    /// Snapshot of the populated keys at one zoom level.
    fn list_populated(&self, zoom: u8) -> Result<Vec<TileKey>, StoreError>;

    /// Zoom levels with at least one populated tile, ascending.
    fn zoom_levels(&self) -> Result<Vec<u8>, StoreError>;
}


#[cfg(test)]
pub(crate) mod contract_tests {
    //! Contract test body shared by every backend's test module.

    use super::*;
    use crate::tile::TILE_SIZE;
    use image::Rgba;

    pub fn sample_tile(seed: u8) -> TileImage {
        let mut tile = TileImage::blank();
        for (i, p) in tile.pixels_mut().pixels_mut().enumerate() {
            *p = Rgba([seed, (i % 251) as u8, seed.wrapping_mul(3), 255]);
        }
        tile
    }

    /// Exercise the full TileStore contract against a fresh, empty store.
    pub fn exercise_store(store: &dyn TileStore) {
        let key = TileKey::new(5, 10, 20);
        let other = TileKey::new(5, 11, 20);
        let coarse = TileKey::new(2, 1, 1);

        // Empty store.
        assert!(store.get(&key).unwrap().is_none());
        assert!(!store.exists(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert!(store.list_populated(5).unwrap().is_empty());
        assert!(store.zoom_levels().unwrap().is_empty());

        // Round trip.
        let tile = sample_tile(42);
        store.put(&key, &tile).unwrap();
        assert!(store.exists(&key).unwrap());
        assert_eq!(store.get(&key).unwrap().unwrap(), tile);

        // Silent overwrite.
        let replacement = sample_tile(99);
        store.put(&key, &replacement).unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap(), replacement);

        // Enumeration per level.
        store.put(&other, &tile).unwrap();
        store.put(&coarse, &tile).unwrap();
        let mut listed = store.list_populated(5).unwrap();
        listed.sort();
        assert_eq!(listed, vec![key, other]);
        assert_eq!(store.list_populated(9).unwrap(), vec![]);
        assert_eq!(store.zoom_levels().unwrap(), vec![2, 5]);

        // Delete.
        assert!(store.delete(&key).unwrap());
        assert!(!store.exists(&key).unwrap());
        assert!(!store.delete(&key).unwrap());
        assert_eq!(store.list_populated(5).unwrap(), vec![other]);

        // Tiles are full-size on the way back out.
        let fetched = store.get(&other).unwrap().unwrap();
        assert_eq!(fetched.pixels().width(), TILE_SIZE);
    }
}
