//! ndmosaic: gap-filled monthly spectral index mosaics
//!
//! Builds seasonal base mosaics, fills cloud and snow gaps in monthly
//! composites, computes yearly per-pixel statistics and stitches the per-tile
//! products into national GeoTIFFs.

pub mod config;
pub mod core;
pub mod io;
pub mod orchestrator;
pub mod types;

// Re-export main types and functions for easier access
pub use config::RunConfig;
pub use orchestrator::{RunSummary, TileOrchestrator};
pub use types::{
    AcquisitionDescriptor, GeoTransform, IndexKind, MaskedRaster, MosaicError, MosaicResult,
    SceneKey, Season, Window,
};
