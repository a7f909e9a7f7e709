//! Per-tile time series access

use crate::types::{MaskedRaster, MosaicResult, SceneKey};
use std::collections::BTreeMap;

/// Source of one tile's composites for one index.
///
/// `read` returns `Ok(None)` when the composite does not exist; a missing
/// prior-year file is a normal condition, not an error.
pub trait SceneSource {
    /// Every (year, month) slot the archive holds for this tile
    fn keys(&self) -> Vec<SceneKey>;

    fn read(&self, key: SceneKey) -> MosaicResult<Option<MaskedRaster<u8>>>;

    /// Output file name used for a filled composite
    fn name(&self, key: SceneKey) -> String;

    fn keys_for_year(&self, year: i32) -> Vec<SceneKey> {
        let mut keys: Vec<SceneKey> = self.keys().into_iter().filter(|k| k.year == year).collect();
        keys.sort();
        keys
    }
}

/// In-memory time series for one tile and one index
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    scenes: BTreeMap<SceneKey, MaskedRaster<u8>>,
    prefix: String,
}

impl TimeSeries {
    pub fn new(prefix: &str) -> Self {
        Self {
            scenes: BTreeMap::new(),
            prefix: prefix.to_string(),
        }
    }

    pub fn insert(&mut self, key: SceneKey, raster: MaskedRaster<u8>) {
        self.scenes.insert(key, raster);
    }

    pub fn get(&self, key: SceneKey) -> Option<&MaskedRaster<u8>> {
        self.scenes.get(&key)
    }
}

impl SceneSource for TimeSeries {
    fn keys(&self) -> Vec<SceneKey> {
        self.scenes.keys().copied().collect()
    }

    fn read(&self, key: SceneKey) -> MosaicResult<Option<MaskedRaster<u8>>> {
        Ok(self.scenes.get(&key).cloned())
    }

    fn name(&self, key: SceneKey) -> String {
        format!("{}_{}_{:02}.tif", self.prefix, key.year, key.month)
    }
}
