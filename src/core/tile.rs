//! Per-tile processing: border gate, seasonal bases, gap filling, statistics, clipping

use crate::config::RunConfig;
use crate::core::base_mosaic::{BaseMosaic, BaseMosaicBuilder, SeasonalBases};
use crate::core::border_gate::{tile_footprint, BorderGate, Coverage};
use crate::core::clip::{BoundaryClipper, ClipPlan};
use crate::core::gap_fill::GapFillPipeline;
use crate::core::series::SceneSource;
use crate::core::statistics::{AmplitudeReference, StatKind, StatRaster, StatisticsEngine};
use crate::types::{GeoTransform, MaskedRaster, MosaicResult, Season, Window};
use geo::MultiPolygon;
use std::collections::BTreeMap;

/// One rectangular piece of the full-extent grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tile {
    pub window: Window,
    /// Georeferencing of the tile's upper-left pixel
    pub transform: GeoTransform,
}

impl Tile {
    /// `<col_off>_<row_off>`, used in every per-tile output path
    pub fn id(&self) -> String {
        format!("{}_{}", self.window.col_off, self.window.row_off)
    }
}

/// Partition a `extent` (width, height) grid into tiles of at most `tile_size`,
/// column-major like the archive layout
pub fn tile_grid(extent: (usize, usize), tile_size: (usize, usize), grid: &GeoTransform) -> Vec<Tile> {
    let (width, height) = extent;
    let (tile_w, tile_h) = tile_size;
    if tile_w == 0 || tile_h == 0 {
        return Vec::new();
    }

    let mut tiles = Vec::new();
    for col_off in (0..width).step_by(tile_w) {
        for row_off in (0..height).step_by(tile_h) {
            let window = Window::new(
                col_off,
                row_off,
                tile_w.min(width - col_off),
                tile_h.min(height - row_off),
            );
            tiles.push(Tile {
                window,
                transform: grid.shifted(col_off, row_off),
            });
        }
    }
    tiles
}

/// Destination of one tile's products
pub trait ProductSink {
    fn write_base(&mut self, base: &BaseMosaic) -> MosaicResult<()>;

    fn write_scene(&mut self, year: i32, name: &str, raster: &MaskedRaster<u8>) -> MosaicResult<()>;

    fn write_statistic(&mut self, year: i32, kind: StatKind, raster: &StatRaster) -> MosaicResult<()>;

    /// Drop anything previously written for this tile
    fn discard(&mut self) -> MosaicResult<()>;
}

/// Keeps a tile's products in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub bases: BTreeMap<Season, MaskedRaster<u8>>,
    pub scenes: BTreeMap<(i32, String), MaskedRaster<u8>>,
    pub statistics: BTreeMap<(i32, StatKind), StatRaster>,
    pub discarded: bool,
}

impl ProductSink for MemorySink {
    fn write_base(&mut self, base: &BaseMosaic) -> MosaicResult<()> {
        self.bases.insert(base.season, base.raster.clone());
        Ok(())
    }

    fn write_scene(&mut self, year: i32, name: &str, raster: &MaskedRaster<u8>) -> MosaicResult<()> {
        self.scenes.insert((year, name.to_string()), raster.clone());
        Ok(())
    }

    fn write_statistic(&mut self, year: i32, kind: StatKind, raster: &StatRaster) -> MosaicResult<()> {
        self.statistics.insert((year, kind), raster.clone());
        Ok(())
    }

    fn discard(&mut self) -> MosaicResult<()> {
        self.bases.clear();
        self.scenes.clear();
        self.statistics.clear();
        self.discarded = true;
        Ok(())
    }
}

/// What happened to a tile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileOutcome {
    /// No overlap with the boundary; nothing written
    Outside,
    Processed(TileSummary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSummary {
    pub clipped: bool,
    pub bases: usize,
    pub scenes: usize,
    pub statistics: usize,
    /// Pixels still masked after every fill stage, summed over the written scenes
    pub unfilled: usize,
}

/// Runs the whole pipeline for one tile against a scene source and a sink
pub struct TileProcessor<'a> {
    config: &'a RunConfig,
    boundary: &'a MultiPolygon<f64>,
}

impl<'a> TileProcessor<'a> {
    pub fn new(config: &'a RunConfig, boundary: &'a MultiPolygon<f64>) -> Self {
        Self { config, boundary }
    }

    pub fn process(
        &self,
        tile: &Tile,
        source: &dyn SceneSource,
        sink: &mut dyn ProductSink,
    ) -> MosaicResult<TileOutcome> {
        let footprint = tile_footprint(&tile.transform, tile.window.width, tile.window.height);
        let coverage = BorderGate::new(self.boundary).classify(&footprint);
        if coverage == Coverage::Outside {
            log::info!("Tile {} is outside the boundary, skipping", tile.id());
            sink.discard()?;
            return Ok(TileOutcome::Outside);
        }
        log::info!("Starting with tile {} ({:?})", tile.id(), coverage);

        let mut summary = TileSummary {
            clipped: coverage.needs_clipping(),
            ..TileSummary::default()
        };

        let builder = BaseMosaicBuilder::new(&self.config.archive_years);
        let mut bases = SeasonalBases::default();
        for season in Season::ALL {
            if let Some(base) = builder.build_from_source(source, season)? {
                sink.write_base(&base)?;
                summary.bases += 1;
                bases.insert(base);
            }
        }

        let base_value = match self.config.amplitude {
            AmplitudeReference::BaseValue => builder.build_base_value(source, self.config.base_quantile)?,
            AmplitudeReference::Quantile25 => None,
        };

        let pipeline = GapFillPipeline::new(self.config.index, self.config.interpolation.clone());
        let engine = StatisticsEngine::new(self.config.amplitude);
        let clipper = summary.clipped.then(|| BoundaryClipper::new(self.boundary));
        let mut plan: Option<ClipPlan> = None;

        for &year in &self.config.product_years {
            log::info!("Tile {}: filling {}", tile.id(), year);
            let scenes = pipeline.fill_year(year, source, &bases)?;
            let Some(first) = scenes.first() else {
                log::warn!("Tile {}: no composites for {}", tile.id(), year);
                continue;
            };

            let months: Vec<&MaskedRaster<u8>> = scenes.iter().map(|s| &s.raster).collect();
            let stats = engine.compute(year, &months, base_value.as_ref())?;

            if plan.is_none() {
                if let Some(clipper) = &clipper {
                    plan = Some(clipper.plan(&first.raster.transform, first.raster.dim())?);
                }
            }

            for scene in &scenes {
                match &plan {
                    Some(plan) => sink.write_scene(year, &scene.name, &plan.apply(&scene.raster)?)?,
                    None => sink.write_scene(year, &scene.name, &scene.raster)?,
                }
                summary.unfilled += scene.report.remaining;
                summary.scenes += 1;
            }

            for (kind, layer) in &stats.layers {
                match &plan {
                    Some(plan) => sink.write_statistic(year, *kind, &clip_statistic(plan, layer)?)?,
                    None => sink.write_statistic(year, *kind, layer)?,
                }
                summary.statistics += 1;
            }
        }

        log::info!(
            "Tile {} done: {} scenes, {} statistics, {} pixels unfilled",
            tile.id(),
            summary.scenes,
            summary.statistics,
            summary.unfilled
        );
        Ok(TileOutcome::Processed(summary))
    }
}

fn clip_statistic(plan: &ClipPlan, layer: &StatRaster) -> MosaicResult<StatRaster> {
    Ok(match layer {
        StatRaster::U8(r) => StatRaster::U8(plan.apply(r)?),
        StatRaster::I16(r) => StatRaster::I16(plan.apply(r)?),
    })
}
