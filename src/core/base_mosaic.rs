use crate::core::series::SceneSource;
use crate::core::statistics::percentile_linear;
use crate::types::{saturating_round, MaskedRaster, MosaicError, MosaicResult, Season};
use ndarray::Array2;

/// Seasonal climatological composite for one tile
#[derive(Debug, Clone)]
pub struct BaseMosaic {
    pub season: Season,
    /// Reference used by the fill stage to pick the months it serves, e.g. `base_spring`
    pub label: String,
    pub raster: MaskedRaster<u8>,
    /// Number of seasonal composites that went into the median
    pub sample_count: usize,
}

/// Spring and autumn base mosaics of one tile, shared read-only by the fill stages
#[derive(Debug, Clone, Default)]
pub struct SeasonalBases {
    pub spring: Option<BaseMosaic>,
    pub autumn: Option<BaseMosaic>,
}

impl SeasonalBases {
    pub fn insert(&mut self, base: BaseMosaic) {
        match base.season {
            Season::Spring => self.spring = Some(base),
            Season::Autumn => self.autumn = Some(base),
        }
    }

    /// Available bases, spring first
    pub fn iter(&self) -> impl Iterator<Item = &BaseMosaic> {
        self.spring.iter().chain(self.autumn.iter())
    }
}

/// Builds seasonal medians and fixed-base percentile rasters from the full archive
pub struct BaseMosaicBuilder {
    archive_years: Vec<i32>,
}

impl BaseMosaicBuilder {
    pub fn new(archive_years: &[i32]) -> Self {
        Self {
            archive_years: archive_years.to_vec(),
        }
    }

    /// Pixelwise median over every archived composite in `season`.
    ///
    /// Returns `Ok(None)` when the archive holds no composite for the season.
    pub fn build_from_source(
        &self,
        source: &dyn SceneSource,
        season: Season,
    ) -> MosaicResult<Option<BaseMosaic>> {
        let mut keys: Vec<_> = source
            .keys()
            .into_iter()
            .filter(|k| self.archive_years.contains(&k.year) && season.contains_month(k.month))
            .collect();
        keys.sort();

        let mut samples = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raster) = source.read(key)? {
                samples.push(raster);
            }
        }
        if samples.is_empty() {
            log::warn!("No {} composites in the archive, base mosaic unavailable", season.label());
            return Ok(None);
        }

        log::info!("Building {} base mosaic from {} composites", season.label(), samples.len());
        let raster = self.median(&samples)?;
        Ok(Some(BaseMosaic {
            season,
            label: format!("base_{}", season.label()),
            raster,
            sample_count: samples.len(),
        }))
    }

    /// Pixelwise median ignoring masked entries; pixels masked in every sample stay masked
    pub fn median(&self, samples: &[MaskedRaster<u8>]) -> MosaicResult<MaskedRaster<u8>> {
        reduce_stack(samples, |values| percentile_linear(values, 50.0))
    }

    /// Low percentile of every archived composite, used as the fixed amplitude base.
    /// Zero-valued pixels are excluded along with masked ones.
    pub fn build_base_value(
        &self,
        source: &dyn SceneSource,
        quantile: f64,
    ) -> MosaicResult<Option<MaskedRaster<u8>>> {
        let mut samples = Vec::new();
        for key in source.keys() {
            if !self.archive_years.contains(&key.year) {
                continue;
            }
            if let Some(mut raster) = source.read(key)? {
                raster.mask.zip_mut_with(&raster.data, |m, &v| *m = *m || v == 0);
                samples.push(raster);
            }
        }
        if samples.is_empty() {
            return Ok(None);
        }
        log::info!("Building {}th percentile base value from {} composites", quantile, samples.len());
        reduce_stack(&samples, |values| percentile_linear(values, quantile)).map(Some)
    }
}

/// Reduce a stack of co-registered rasters pixel by pixel over their valid entries
fn reduce_stack<F>(samples: &[MaskedRaster<u8>], reduce: F) -> MosaicResult<MaskedRaster<u8>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let first = samples
        .first()
        .ok_or_else(|| MosaicError::Processing("Cannot reduce an empty stack".to_string()))?;
    if samples.iter().any(|s| !s.same_grid(first)) {
        return Err(MosaicError::Processing(
            "Stacked rasters do not share a grid".to_string(),
        ));
    }

    let shape = first.dim();
    let mut data = Array2::from_elem(shape, first.nodata);
    let mut mask = Array2::from_elem(shape, true);
    let mut values: Vec<f64> = Vec::with_capacity(samples.len());

    for i in 0..shape.0 {
        for j in 0..shape.1 {
            values.clear();
            values.extend(samples.iter().filter_map(|s| s.valid(i, j)).map(f64::from));
            values.sort_by(|a, b| a.total_cmp(b));
            if let Some(v) = reduce(&values) {
                data[[i, j]] = saturating_round(v);
                mask[[i, j]] = false;
            }
        }
    }

    MaskedRaster::new(data, mask, first.nodata, first.transform, first.crs.clone())
}
