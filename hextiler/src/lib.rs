//! Hextiler - tile pyramid generation and merging for Web Mercator rasters.
//!
//! Hextiler turns a georeferenced raster into a sparse quadtree pyramid of
//! 256×256 RGBA tiles, merges pyramids under explicit precedence policies,
//! and converts pyramids between storage backends and tiling schemes.
//!
//! # Architecture
//!
//! The crate is organized around three seams:
//!
//! - [`raster::RasterSource`] abstracts the input imagery: an extent, a
//!   native resolution, and windowed reads with a selectable resampling
//!   kernel. Alpha carries per-pixel validity; alpha 0 is no-data.
//! - [`store::TileStore`] abstracts tile persistence: a directory tree of
//!   PNG files, a SQLite database, or an in-memory map share one contract.
//! - [`coord`] holds the pure tile arithmetic: Web Mercator extents, TMS
//!   and Google (XYZ) addressing, and the parent/child quadtree relations
//!   everything else is built on.
//!
//! On top of those sit the three jobs: [`pyramid::PyramidBuilder`] builds a
//! pyramid finest-level-first and derives coarser levels by downsampling
//! already-written tiles, [`merge::MergeJob`] composites several pyramids
//! into one, and [`convert::convert_store`] copies a pyramid across
//! backends and schemes.
//!
//! # Example
//!
//! ```no_run
//! use hextiler::coord::{GeoBox, TilingScheme};
//! use hextiler::pyramid::{BuildConfig, PyramidBuilder};
//! use hextiler::raster::MemoryRaster;
//! use hextiler::store::DirectoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let extent = GeoBox::new(0.0, 0.0, 10_000.0, 10_000.0);
//! let raster = MemoryRaster::open("input.png", extent, "EPSG:3857")?;
//! let store = DirectoryStore::create("./tiles")?;
//!
//! let builder = PyramidBuilder::new(BuildConfig {
//!     scheme: TilingScheme::Google,
//!     min_zoom: 8,
//!     ..BuildConfig::default()
//! });
//! let report = builder.build(&raster, &store, &CancellationToken::new())?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod convert;
pub mod coord;
pub mod error;
pub mod merge;
pub mod pyramid;
pub mod raster;
pub mod retry;
pub mod store;
pub mod tile;

pub use convert::{convert_store, ConvertReport};
pub use coord::{GeoBox, TileKey, TilingScheme};
pub use error::TilerError;
pub use merge::{MergeJob, MergePolicy, MergeReport};
pub use pyramid::{BuildConfig, BuildReport, PyramidBuilder};
pub use raster::{RasterSource, Resampling};
pub use retry::RetryPolicy;
pub use store::{DirectoryStore, MemoryStore, SqliteStore, TileStore};
pub use tile::TileImage;
