//! File-system and GDAL adapters

pub mod boundary;
pub mod discovery;
pub mod merge;
pub mod raster;
pub mod sink;

pub use boundary::NationalBoundary;
pub use discovery::{discover_archive, quality_sibling};
pub use merge::{plan_merge_jobs, MergeJob};
pub use raster::{build_overviews, read_grid_info, read_window, write_masked, GdalSceneSource, GridInfo};
pub use sink::{GeoTiffSink, TileLayout};
