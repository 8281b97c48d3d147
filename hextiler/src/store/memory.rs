//! In-memory tile store for tests and staging merges.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{StoreError, TileStore};
use crate::coord::TileKey;
use crate::tile::TileImage;

/// HashMap-backed tile store.
///
/// Stores decoded tiles directly; nothing is encoded, so this backend never
/// produces I/O errors and is the natural seam for builder and merge tests.
#[derive(Default)]
pub struct MemoryStore {
    tiles: RwLock<HashMap<TileKey, TileImage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tiles across all zoom levels.
    pub fn len(&self) -> usize {
        self.tiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.read().is_empty()
    }
}

impl TileStore for MemoryStore {
    fn get(&self, key: &TileKey) -> Result<Option<TileImage>, StoreError> {
        Ok(self.tiles.read().get(key).cloned())
    }

    fn put(&self, key: &TileKey, tile: &TileImage) -> Result<(), StoreError> {
        self.tiles.write().insert(*key, tile.clone());
        Ok(())
    }

    fn exists(&self, key: &TileKey) -> Result<bool, StoreError> {
        Ok(self.tiles.read().contains_key(key))
    }

    fn delete(&self, key: &TileKey) -> Result<bool, StoreError> {
        Ok(self.tiles.write().remove(key).is_some())
    }

    fn list_populated(&self, zoom: u8) -> Result<Vec<TileKey>, StoreError> {
        let mut keys: Vec<TileKey> = self
            .tiles
            .read()
            .keys()
            .filter(|k| k.zoom == zoom)
            .copied()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn zoom_levels(&self) -> Result<Vec<u8>, StoreError> {
        let mut zooms: Vec<u8> = self.tiles.read().keys().map(|k| k.zoom).collect();
        zooms.sort_unstable();
        zooms.dedup();
        Ok(zooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract_tests::exercise_store;

    #[test]
    fn test_store_contract() {
        let store = MemoryStore::new();
        exercise_store(&store);
        assert!(!store.is_empty());
    }
}
