//! Directory-tree tile store.
//!
//! Lays tiles out as `{root}/{zoom}/{x}/{y}.png`, the layout understood by
//! TMS- and XYZ-style map clients. Whether the y index counts from the
//! north or the south is the caller's tiling-scheme concern; the store only
//! persists keys.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use tracing::trace;

use super::{StoreError, TileStore};
use crate::coord::TileKey;
use crate::tile::TileImage;

const TILE_EXT: &str = "png";

/// Tile store backed by a `{zoom}/{x}/{y}.png` directory tree.
///
/// Per-tile reads and writes can carry an operation deadline; see
/// [`DirectoryStore::create_with_timeout`].
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    op_timeout: Option<Duration>,
}

impl DirectoryStore {
    /// Open (and create if missing) a directory store rooted at `root`.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            op_timeout: None,
        })
    }

    /// Like [`DirectoryStore::create`], with a deadline on every per-tile
    /// read and write. Network filesystems can stall a single `read(2)` for
    /// minutes; a deadlined operation instead fails with a timed-out I/O
    /// error, which retries as transient.
    pub fn create_with_timeout(
        root: impl Into<PathBuf>,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let mut store = Self::create(root)?;
        store.op_timeout = Some(op_timeout);
        Ok(store)
    }

    /// Run `op` under the configured deadline, if any.
    ///
    /// A timed-out operation keeps running on its abandoned thread; its
    /// late result is dropped along with the channel.
    fn bounded<T: Send + 'static>(
        &self,
        key: &TileKey,
        op: impl FnOnce() -> Result<T, StoreError> + Send + 'static,
    ) -> Result<T, StoreError> {
        let Some(limit) = self.op_timeout else {
            return op();
        };
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(op());
        });
        match rx.recv_timeout(limit) {
            Ok(result) => result,
            Err(_) => Err(StoreError::Io {
                key: *key,
                source: io::Error::new(
                    ErrorKind::TimedOut,
                    format!("filesystem operation exceeded {:?}", limit),
                ),
            }),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.root
            .join(key.zoom.to_string())
            .join(key.x.to_string())
            .join(format!("{}.{}", key.y, TILE_EXT))
    }

    /// Numeric directory entries under `dir`, or empty if `dir` is absent.
    fn numeric_entries(dir: &Path) -> Result<Vec<(u32, PathBuf)>, StoreError> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            // Non-numeric entries (dotfiles, sidecars) are not tiles.
            if let Some(value) = name.to_str().and_then(|s| s.parse::<u32>().ok()) {
                out.push((value, entry.path()));
            }
        }
        Ok(out)
    }
}

impl TileStore for DirectoryStore {
    fn get(&self, key: &TileKey) -> Result<Option<TileImage>, StoreError> {
        let path = self.tile_path(key);
        let key = *key;
        self.bounded(&key, move || {
            let data = match fs::read(&path) {
                Ok(d) => d,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(StoreError::Io { key, source: e }),
            };
            let tile = TileImage::from_png(&data)
                .map_err(|e| StoreError::CorruptTile { key, source: e })?;
            Ok(Some(tile))
        })
    }

    fn put(&self, key: &TileKey, tile: &TileImage) -> Result<(), StoreError> {
        let path = self.tile_path(key);
        let key = *key;
        // Encode before the deadline clock starts; encoding is CPU work,
        // not filesystem I/O.
        let data = tile
            .to_png()
            .map_err(|e| StoreError::Encode { key, source: e })?;
        self.bounded(&key, move || {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::Io { key, source: e })?;
            }
            // Write-then-rename so readers never observe a half-written tile.
            let tmp = path.with_extension("png.tmp");
            fs::write(&tmp, &data).map_err(|e| StoreError::Io { key, source: e })?;
            fs::rename(&tmp, &path).map_err(|e| StoreError::Io { key, source: e })?;
            trace!(tile = %key, bytes = data.len(), "wrote tile");
            Ok(())
        })
    }

    fn exists(&self, key: &TileKey) -> Result<bool, StoreError> {
        Ok(self.tile_path(key).is_file())
    }

    fn delete(&self, key: &TileKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.tile_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io { key: *key, source: e }),
        }
    }

    fn list_populated(&self, zoom: u8) -> Result<Vec<TileKey>, StoreError> {
        let mut keys = Vec::new();
        let zoom_dir = self.root.join(zoom.to_string());
        for (x, x_dir) in Self::numeric_entries(&zoom_dir)? {
            for entry in match fs::read_dir(&x_dir) {
                Ok(e) => e,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            } {
                let entry = entry?;
                let name = entry.file_name();
                let y = name
                    .to_str()
                    .and_then(|s| s.strip_suffix(&format!(".{}", TILE_EXT)))
                    .and_then(|s| s.parse::<u32>().ok());
                if let Some(y) = y {
                    keys.push(TileKey::new(zoom, x, y));
                }
            }
        }
        // Directory iteration order is arbitrary; keep listings stable.
        keys.sort();
        Ok(keys)
    }

    fn zoom_levels(&self) -> Result<Vec<u8>, StoreError> {
        let mut zooms: Vec<u8> = Self::numeric_entries(&self.root)?
            .into_iter()
            .filter_map(|(z, path)| {
                if z > u8::MAX as u32 || !path.is_dir() {
                    return None;
                }
                Some(z as u8)
            })
            .collect();
        zooms.sort_unstable();
        // An empty zoom directory left by deletes is not a populated level.
        zooms.retain(|z| {
            self.list_populated(*z)
                .map(|keys| !keys.is_empty())
                .unwrap_or(false)
        });
        Ok(zooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract_tests::{exercise_store, sample_tile};

    #[test]
    fn test_store_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(dir.path().join("tiles")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_store_contract_with_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            DirectoryStore::create_with_timeout(dir.path().join("tiles"), Duration::from_secs(30))
                .unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_operation_deadline_reports_timed_out_io() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            DirectoryStore::create_with_timeout(dir.path(), Duration::from_millis(1)).unwrap();
        let key = TileKey::new(1, 0, 0);

        let result: Result<(), StoreError> = store.bounded(&key, || {
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(err.is_transient());
        match err {
            StoreError::Io { key: err_key, source } => {
                assert_eq!(err_key, key);
                assert_eq!(source.kind(), ErrorKind::TimedOut);
            }
            other => panic!("expected an I/O error, got {other}"),
        }
    }

    #[test]
    fn test_layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(dir.path()).unwrap();
        let key = TileKey::new(7, 31, 44);
        store.put(&key, &sample_tile(1)).unwrap();
        assert!(dir.path().join("7").join("31").join("44.png").is_file());
    }

    #[test]
    fn test_foreign_files_ignored_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(dir.path()).unwrap();
        store.put(&TileKey::new(3, 1, 2), &sample_tile(5)).unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not a tile").unwrap();
        std::fs::write(dir.path().join("3").join("1").join("notes.md"), b"x").unwrap();

        assert_eq!(store.zoom_levels().unwrap(), vec![3]);
        assert_eq!(
            store.list_populated(3).unwrap(),
            vec![TileKey::new(3, 1, 2)]
        );
    }

    #[test]
    fn test_corrupt_tile_reported_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::create(dir.path()).unwrap();
        let key = TileKey::new(2, 0, 1);
        let path = dir.path().join("2").join("0");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("1.png"), b"garbage").unwrap();

        let err = store.get(&key).unwrap_err();
        assert!(matches!(err, StoreError::CorruptTile { .. }));
        assert!(err.to_string().contains("2/0/1"));
    }
}
