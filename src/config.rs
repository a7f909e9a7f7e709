//! Run configuration passed explicitly to every component

use crate::core::interpolate::InterpolationParams;
use crate::core::statistics::AmplitudeReference;
use crate::types::{IndexKind, MosaicError, MosaicResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything a run needs to know, in one place
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Archive root containing `<year>/<INDEX>/` folders
    pub input_root: PathBuf,
    /// Output root; products land under `<output_root>/<index>/`
    pub output_root: PathBuf,
    /// National boundary vector file
    pub boundary_path: PathBuf,
    pub index: IndexKind,
    /// Full archive window used for base mosaics and cross-year fill sources
    pub archive_years: Vec<i32>,
    /// Trailing years that get filled mosaics and statistics
    pub product_years: Vec<i32>,
    /// Full-extent grid size in pixels (width, height)
    pub extent: (usize, usize),
    /// Tile size in pixels (width, height)
    pub tile_size: (usize, usize),
    pub tile_workers: usize,
    pub merge_workers: usize,
    pub overview_workers: usize,
    pub interpolation: InterpolationParams,
    pub amplitude: AmplitudeReference,
    /// Percentile of the full archive used as the fixed amplitude base
    pub base_quantile: f64,
    pub build_overviews: bool,
    /// Keep per-tile subtrees after merging
    pub keep_tile_outputs: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("."),
            output_root: PathBuf::from("."),
            boundary_path: PathBuf::from("aux_data/fin_borders.shp"),
            index: IndexKind::Ndvi,
            archive_years: (2016..=2021).collect(),
            product_years: (2018..=2021).collect(),
            extent: (79_200, 120_000), // 8 x 12 tiles
            tile_size: (9_900, 10_000),
            tile_workers: 5,
            merge_workers: 8,
            overview_workers: 8,
            interpolation: InterpolationParams::default(),
            amplitude: AmplitudeReference::default(),
            base_quantile: 10.0,
            build_overviews: true,
            keep_tile_outputs: false,
        }
    }
}

impl RunConfig {
    /// Load a JSON configuration; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        log::info!("Loading run configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: RunConfig = serde_json::from_str(&text)
            .map_err(|e| MosaicError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MosaicResult<()> {
        if self.tile_size.0 == 0 || self.tile_size.1 == 0 {
            return Err(MosaicError::Config("Tile size must be positive".to_string()));
        }
        if self.extent.0 == 0 || self.extent.1 == 0 {
            return Err(MosaicError::Config("Extent must be positive".to_string()));
        }
        if self.tile_workers == 0 || self.merge_workers == 0 || self.overview_workers == 0 {
            return Err(MosaicError::Config("Worker counts must be positive".to_string()));
        }
        if self.product_years.is_empty() {
            return Err(MosaicError::Config("No product years configured".to_string()));
        }
        if let Some(y) = self
            .product_years
            .iter()
            .find(|y| !self.archive_years.contains(y))
        {
            return Err(MosaicError::Config(format!(
                "Product year {} is outside the archive years {:?}",
                y, self.archive_years
            )));
        }
        if !(0.0..=100.0).contains(&self.base_quantile) {
            return Err(MosaicError::Config(format!(
                "Base quantile {} is outside [0, 100]",
                self.base_quantile
            )));
        }
        self.interpolation.validate()
    }

    /// `<output_root>/<index>`
    pub fn index_root(&self) -> PathBuf {
        self.output_root.join(self.index.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.extent.0 / config.tile_size.0, 8);
        assert_eq!(config.extent.1 / config.tile_size.1, 12);
    }

    #[test]
    fn test_product_years_must_be_archived() {
        let config = RunConfig {
            product_years: vec![2022],
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(MosaicError::Config(_))));
    }

    #[test]
    fn test_json_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"index": "ndbi", "tile_workers": 2}"#).unwrap();

        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.index, IndexKind::Ndbi);
        assert_eq!(config.tile_workers, 2);
        assert_eq!(config.tile_size, (9_900, 10_000));
    }
}
