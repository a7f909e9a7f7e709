//! Core gap-filling and statistics modules

pub mod base_mosaic;
pub mod border_gate;
pub mod clip;
pub mod gap_fill;
pub mod interpolate;
pub mod series;
pub mod statistics;
pub mod tile;

// Re-export main types
pub use base_mosaic::{BaseMosaic, BaseMosaicBuilder, SeasonalBases};
pub use border_gate::{BorderGate, Coverage};
pub use clip::{BoundaryClipper, ClipPlan};
pub use gap_fill::{FillReport, FilledScene, GapFillPipeline};
pub use interpolate::{InterpolationParams, SpatialInterpolator};
pub use series::{SceneSource, TimeSeries};
pub use statistics::{AmplitudeReference, StatKind, StatRaster, StatisticsEngine, StatisticsSet};
pub use tile::{tile_grid, MemorySink, ProductSink, Tile, TileOutcome, TileProcessor, TileSummary};
