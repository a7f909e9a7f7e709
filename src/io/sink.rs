use crate::core::base_mosaic::BaseMosaic;
use crate::core::statistics::{StatKind, StatRaster};
use crate::core::tile::{ProductSink, Tile};
use crate::io::raster::write_masked;
use crate::types::{MaskedRaster, MosaicResult, Season};
use std::path::{Path, PathBuf};

pub const BASE_DIR: &str = "base_mosaics";
pub const INTERP_PREFIX: &str = "interp_";
pub const STATS_PREFIX: &str = "stats_";

/// Per-tile output paths under `<output>/<index>/`
#[derive(Debug, Clone)]
pub struct TileLayout {
    pub root: PathBuf,
    pub tile_id: String,
}

impl TileLayout {
    pub fn new<P: AsRef<Path>>(index_root: P, tile: &Tile) -> Self {
        Self {
            root: index_root.as_ref().to_path_buf(),
            tile_id: tile.id(),
        }
    }

    pub fn base_path(&self, season: Season) -> PathBuf {
        self.root
            .join(BASE_DIR)
            .join(format!("base_{}_{}.tif", season.label(), self.tile_id))
    }

    pub fn interp_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", INTERP_PREFIX, self.tile_id))
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.root.join(format!("{}{}", STATS_PREFIX, self.tile_id))
    }

    pub fn scene_path(&self, year: i32, name: &str) -> PathBuf {
        self.interp_dir().join(year.to_string()).join(name)
    }

    pub fn statistic_path(&self, year: i32, kind: StatKind) -> PathBuf {
        self.stats_dir().join(year.to_string()).join(kind.file_name())
    }
}

/// Writes a tile's products as GeoTIFFs into its own subtree
pub struct GeoTiffSink {
    layout: TileLayout,
}

impl GeoTiffSink {
    pub fn new(layout: TileLayout) -> Self {
        Self { layout }
    }
}

impl ProductSink for GeoTiffSink {
    fn write_base(&mut self, base: &BaseMosaic) -> MosaicResult<()> {
        write_masked(self.layout.base_path(base.season), &base.raster)
    }

    fn write_scene(&mut self, year: i32, name: &str, raster: &MaskedRaster<u8>) -> MosaicResult<()> {
        write_masked(self.layout.scene_path(year, name), raster)
    }

    fn write_statistic(&mut self, year: i32, kind: StatKind, raster: &StatRaster) -> MosaicResult<()> {
        let path = self.layout.statistic_path(year, kind);
        match raster {
            StatRaster::U8(r) => write_masked(path, r),
            StatRaster::I16(r) => write_masked(path, r),
        }
    }

    fn discard(&mut self) -> MosaicResult<()> {
        for dir in [self.layout.interp_dir(), self.layout.stats_dir()] {
            if dir.exists() {
                log::debug!("Removing {}", dir.display());
                std::fs::remove_dir_all(&dir)?;
            }
        }
        for season in Season::ALL {
            let path = self.layout.base_path(season);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
