//! National run: tiles in a bounded pool, then merge, then overviews

use crate::config::RunConfig;
use crate::core::tile::{tile_grid, ProductSink, Tile, TileOutcome, TileProcessor};
use crate::io::boundary::NationalBoundary;
use crate::io::discovery::discover_archive;
use crate::io::merge::{plan_merge_jobs, remove_tile_outputs};
use crate::io::raster::{build_overviews, read_grid_info, GdalSceneSource};
use crate::io::sink::{GeoTiffSink, TileLayout};
use crate::types::{AcquisitionDescriptor, MosaicError, MosaicResult};
use geo::MultiPolygon;
use std::path::PathBuf;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Counts reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub outside: usize,
    /// Ids of tiles that failed; their partial outputs were removed
    pub failed: Vec<String>,
    pub merged: usize,
    pub overviews: usize,
}

/// Apply `f` to every item on a pool of `workers` threads
fn run_parallel<I, R, F>(workers: usize, items: &[I], f: F) -> MosaicResult<Vec<R>>
where
    I: Sync,
    R: Send,
    F: Fn(&I) -> R + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| MosaicError::Processing(format!("Failed to build thread pool: {}", e)))?;
        Ok(pool.install(|| items.par_iter().map(|item| f(item)).collect()))
    }

    #[cfg(not(feature = "parallel"))]
    {
        log::debug!("Parallel feature disabled, ignoring {} workers", workers);
        Ok(items.iter().map(f).collect())
    }
}

pub struct TileOrchestrator {
    config: RunConfig,
}

impl TileOrchestrator {
    pub fn new(config: RunConfig) -> MosaicResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(&self) -> MosaicResult<RunSummary> {
        let descriptors = discover_archive(
            &self.config.input_root,
            self.config.index,
            &self.config.archive_years,
        )?;
        let reference = descriptors.first().ok_or_else(|| {
            MosaicError::Config(format!(
                "No {} composites under {}",
                self.config.index,
                self.config.input_root.display()
            ))
        })?;
        let grid = read_grid_info(&reference.path)?;
        let boundary = NationalBoundary::load(&self.config.boundary_path)?;
        std::fs::create_dir_all(self.config.index_root())?;

        let tiles = tile_grid(self.config.extent, self.config.tile_size, &grid.transform);
        log::info!(
            "Processing {} tiles with {} workers",
            tiles.len(),
            self.config.tile_workers
        );
        let mut summary = self.process_tiles(&tiles, &descriptors, &boundary.polygons)?;

        let merged = self.merge()?;
        summary.merged = merged.len();
        if self.config.build_overviews {
            summary.overviews = self.build_overviews(&merged)?;
        }

        log::info!(
            "Run finished: {} tiles processed, {} outside, {} failed, {} files merged",
            summary.processed,
            summary.outside,
            summary.failed.len(),
            summary.merged
        );
        Ok(summary)
    }

    /// Run every tile; a failing tile is logged and does not stop the others
    pub fn process_tiles(
        &self,
        tiles: &[Tile],
        descriptors: &[AcquisitionDescriptor],
        boundary: &MultiPolygon<f64>,
    ) -> MosaicResult<RunSummary> {
        let results = run_parallel(self.config.tile_workers, tiles, |tile| {
            (tile.id(), self.process_tile(tile, descriptors, boundary))
        })?;

        let mut summary = RunSummary::default();
        for (id, result) in results {
            match result {
                Ok(TileOutcome::Outside) => summary.outside += 1,
                Ok(TileOutcome::Processed(_)) => summary.processed += 1,
                Err(_) => summary.failed.push(id),
            }
        }
        Ok(summary)
    }

    fn process_tile(
        &self,
        tile: &Tile,
        descriptors: &[AcquisitionDescriptor],
        boundary: &MultiPolygon<f64>,
    ) -> MosaicResult<TileOutcome> {
        let source = GdalSceneSource::new(self.config.index, tile.window, descriptors);
        let mut sink = GeoTiffSink::new(TileLayout::new(self.config.index_root(), tile));

        let result = TileProcessor::new(&self.config, boundary).process(tile, &source, &mut sink);
        if let Err(e) = &result {
            log::error!("Tile {} failed: {}", tile.id(), e);
            if let Err(cleanup) = sink.discard() {
                log::warn!("Could not remove partial outputs of tile {}: {}", tile.id(), cleanup);
            }
        }
        result
    }

    /// Stitch tile outputs into national rasters. Returns the merged paths.
    pub fn merge(&self) -> MosaicResult<Vec<PathBuf>> {
        let root = self.config.index_root();
        let jobs = plan_merge_jobs(&root, &self.config.product_years)?;
        log::info!("Merging {} outputs with {} workers", jobs.len(), self.config.merge_workers);

        let results = run_parallel(self.config.merge_workers, &jobs, |job| job.run())?;
        let mut merged = Vec::with_capacity(jobs.len());
        let mut failures = 0;
        for (job, result) in jobs.iter().zip(results) {
            match result {
                Ok(()) => merged.push(job.output.clone()),
                Err(e) => {
                    log::error!("Merging {} failed: {}", job.output.display(), e);
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            return Err(MosaicError::Processing(format!(
                "{} merges failed, tile outputs kept under {}",
                failures,
                root.display()
            )));
        }

        if !self.config.keep_tile_outputs {
            remove_tile_outputs(&root)?;
        }
        Ok(merged)
    }

    /// Returns how many files got overviews
    pub fn build_overviews(&self, paths: &[PathBuf]) -> MosaicResult<usize> {
        let results = run_parallel(self.config.overview_workers, paths, |path| {
            build_overviews(path).map_err(|e| {
                log::error!("Overviews for {} failed: {}", path.display(), e);
                e
            })
        })?;
        Ok(results.iter().filter(|r| r.is_ok()).count())
    }
}
