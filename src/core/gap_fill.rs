//! Ordered gap-filling stages for one tile's trailing years
//!
//! Every stage only writes to currently masked pixels, so a valid pixel keeps
//! its value through the whole pipeline.

use crate::core::base_mosaic::{BaseMosaic, SeasonalBases};
use crate::core::interpolate::{InterpolationParams, SpatialInterpolator};
use crate::core::series::SceneSource;
use crate::types::{saturating_round, IndexKind, MaskedRaster, MosaicError, MosaicResult, Season};
use std::collections::BTreeMap;

/// Month filled from its calendar neighbours
pub const NEIGHBOR_FILL_MONTH: u32 = 8;

/// Pixels resolved by each stage for one raster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    pub cross_year: usize,
    pub interpolated: usize,
    pub seasonal_base: usize,
    pub monthly_neighbor: usize,
    /// Masked pixels left after every stage; written as nodata
    pub remaining: usize,
}

/// One filled month of a product year
#[derive(Debug, Clone)]
pub struct FilledScene {
    pub month: u32,
    pub name: String,
    pub raster: MaskedRaster<u8>,
    pub report: FillReport,
}

/// Fixed stage sequence: cross-year max, spatial interpolation, seasonal base,
/// monthly neighbours.
pub struct GapFillPipeline {
    index: IndexKind,
    interpolator: SpatialInterpolator,
}

impl GapFillPipeline {
    pub fn new(index: IndexKind, params: InterpolationParams) -> Self {
        Self {
            index,
            interpolator: SpatialInterpolator::new(params),
        }
    }

    /// Fill every month of `year`, in month order, from `source` and the tile's bases.
    pub fn fill_year(
        &self,
        year: i32,
        source: &dyn SceneSource,
        bases: &SeasonalBases,
    ) -> MosaicResult<Vec<FilledScene>> {
        let mut filled: BTreeMap<u32, FilledScene> = BTreeMap::new();

        for key in source.keys_for_year(year) {
            let Some(mut raster) = source.read(key)? else {
                log::warn!("Composite {} listed but unreadable, skipping", key);
                continue;
            };
            let mut report = FillReport::default();

            let prev1 = source.read(key.years_back(1))?;
            let prev2 = source.read(key.years_back(2))?;
            report.cross_year = self.cross_year_max_fill(&mut raster, prev1.as_ref(), prev2.as_ref())?;

            report.interpolated = self.spatial_fill(&mut raster);

            for base in bases.iter() {
                report.seasonal_base += self.labeled_base_fill(&mut raster, key.month, base)?;
            }

            log::debug!(
                "{}: cross-year {}, interpolated {}, base {}",
                key,
                report.cross_year,
                report.interpolated,
                report.seasonal_base
            );
            filled.insert(
                key.month,
                FilledScene {
                    month: key.month,
                    name: source.name(key),
                    raster,
                    report,
                },
            );
        }

        if let Some(mut target) = filled.remove(&NEIGHBOR_FILL_MONTH) {
            let prev = filled.get(&(NEIGHBOR_FILL_MONTH - 1)).map(|s| &s.raster);
            let next = filled.get(&(NEIGHBOR_FILL_MONTH + 1)).map(|s| &s.raster);
            target.report.monthly_neighbor = self.monthly_neighbor_fill(&mut target.raster, prev, next)?;
            filled.insert(NEIGHBOR_FILL_MONTH, target);
        }

        let mut scenes: Vec<FilledScene> = filled.into_values().collect();
        for scene in &mut scenes {
            scene.report.remaining = scene.raster.masked_count();
        }
        Ok(scenes)
    }

    /// Stage 1: masked pixels take the maximum of the same month in the two
    /// preceding years. Absent years and masked candidates contribute nothing.
    pub fn cross_year_max_fill(
        &self,
        target: &mut MaskedRaster<u8>,
        prev1: Option<&MaskedRaster<u8>>,
        prev2: Option<&MaskedRaster<u8>>,
    ) -> MosaicResult<usize> {
        let sources: Vec<&MaskedRaster<u8>> = prev1.into_iter().chain(prev2).collect();
        for s in &sources {
            check_grid(target, s)?;
        }
        if sources.is_empty() {
            return Ok(0);
        }

        let (rows, cols) = target.dim();
        let mut count = 0;
        for i in 0..rows {
            for j in 0..cols {
                if !target.mask[[i, j]] {
                    continue;
                }
                if let Some(v) = sources.iter().filter_map(|s| s.valid(i, j)).max() {
                    target.fill_pixel(i, j, v);
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Stage 2: distance-limited inpainting, skipped for sentinel-ambiguous indices
    pub fn spatial_fill(&self, target: &mut MaskedRaster<u8>) -> usize {
        if !self.index.interpolates() {
            return 0;
        }
        self.interpolator.fill(target, self.index.valid_range())
    }

    /// Stage 3: copy the base mosaic's valid pixels into masked pixels
    pub fn base_fill(&self, target: &mut MaskedRaster<u8>, base: &MaskedRaster<u8>) -> MosaicResult<usize> {
        check_grid(target, base)?;
        let (rows, cols) = target.dim();
        let mut count = 0;
        for i in 0..rows {
            for j in 0..cols {
                if target.mask[[i, j]] {
                    if let Some(v) = base.valid(i, j) {
                        target.fill_pixel(i, j, v);
                        count += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Stage 3 for the base named by `base.label` (e.g. `base_spring_9900_0`).
    ///
    /// An unrecognised label is logged and the fill is skipped. A month outside
    /// the label's season is left alone.
    pub fn labeled_base_fill(
        &self,
        target: &mut MaskedRaster<u8>,
        month: u32,
        base: &BaseMosaic,
    ) -> MosaicResult<usize> {
        let Some(season) = Season::from_label(&base.label) else {
            log::warn!("Faulty base mosaic label '{}', skipping", base.label);
            return Ok(0);
        };
        if !season.contains_month(month) {
            return Ok(0);
        }
        self.base_fill(target, &base.raster)
    }

    /// Stage 4: mean of the previous and next month of the same year,
    /// each masked source excluded.
    pub fn monthly_neighbor_fill(
        &self,
        target: &mut MaskedRaster<u8>,
        prev: Option<&MaskedRaster<u8>>,
        next: Option<&MaskedRaster<u8>>,
    ) -> MosaicResult<usize> {
        let sources: Vec<&MaskedRaster<u8>> = prev.into_iter().chain(next).collect();
        for s in &sources {
            check_grid(target, s)?;
        }

        let (rows, cols) = target.dim();
        let mut count = 0;
        for i in 0..rows {
            for j in 0..cols {
                if !target.mask[[i, j]] {
                    continue;
                }
                let (sum, n) = sources
                    .iter()
                    .filter_map(|s| s.valid(i, j))
                    .fold((0.0f64, 0usize), |(sum, n), v| (sum + f64::from(v), n + 1));
                if n > 0 {
                    target.fill_pixel(i, j, saturating_round(sum / n as f64));
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

fn check_grid(target: &MaskedRaster<u8>, source: &MaskedRaster<u8>) -> MosaicResult<()> {
    if target.dim() != source.dim() {
        return Err(MosaicError::Processing(format!(
            "Fill source shape {:?} does not match target {:?}",
            source.dim(),
            target.dim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::{array, Array2};

    fn raster(data: Array2<u8>) -> MaskedRaster<u8> {
        let gt = GeoTransform::from_gdal([0.0, 10.0, 0.0, 0.0, 0.0, -10.0]);
        MaskedRaster::from_sentinel(data, 0, gt, String::new())
    }

    fn pipeline() -> GapFillPipeline {
        GapFillPipeline::new(IndexKind::Ndvi, InterpolationParams::default())
    }

    #[test]
    fn test_cross_year_takes_max_of_available() {
        let mut target = raster(array![[0u8, 0, 0, 9]]);
        let y1 = raster(array![[30u8, 0, 0, 99]]);
        let y2 = raster(array![[50u8, 70, 0, 99]]);

        let n = pipeline()
            .cross_year_max_fill(&mut target, Some(&y1), Some(&y2))
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(target.valid(0, 0), Some(50));
        assert_eq!(target.valid(0, 1), Some(70));
        assert_eq!(target.valid(0, 2), None);
        assert_eq!(target.valid(0, 3), Some(9));
    }

    #[test]
    fn test_cross_year_missing_years() {
        let mut target = raster(array![[0u8, 0]]);
        let y2 = raster(array![[40u8, 0]]);
        pipeline().cross_year_max_fill(&mut target, None, Some(&y2)).unwrap();
        assert_eq!(target.valid(0, 0), Some(40));

        let mut untouched = raster(array![[0u8, 0]]);
        assert_eq!(pipeline().cross_year_max_fill(&mut untouched, None, None).unwrap(), 0);
        assert_eq!(untouched.masked_count(), 2);
    }

    #[test]
    fn test_monthly_neighbor_mean() {
        let mut target = raster(array![[0u8, 0, 0, 5]]);
        let july = raster(array![[10u8, 0, 0, 200]]);
        let sept = raster(array![[21u8, 60, 0, 200]]);

        pipeline()
            .monthly_neighbor_fill(&mut target, Some(&july), Some(&sept))
            .unwrap();
        assert_eq!(target.valid(0, 0), Some(16)); // 15.5 rounds up
        assert_eq!(target.valid(0, 1), Some(60));
        assert_eq!(target.valid(0, 2), None);
        assert_eq!(target.valid(0, 3), Some(5));
    }

    #[test]
    fn test_labeled_base_fill() {
        let base = |label: &str| BaseMosaic {
            season: Season::Spring,
            label: label.to_string(),
            raster: raster(array![[77u8, 0]]),
            sample_count: 4,
        };
        let p = pipeline();

        let mut target = raster(array![[0u8, 0]]);
        assert_eq!(p.labeled_base_fill(&mut target, 4, &base("base_winter_0_0")).unwrap(), 0);
        assert_eq!(p.labeled_base_fill(&mut target, 10, &base("base_spring_0_0")).unwrap(), 0);
        assert_eq!(p.labeled_base_fill(&mut target, 5, &base("base_spring_0_0")).unwrap(), 1);
        assert_eq!(target.valid(0, 0), Some(77));
        assert_eq!(target.valid(0, 1), None);
    }

    #[test]
    fn test_faulty_base_label_skips_fill() {
        use crate::core::series::TimeSeries;
        use crate::types::SceneKey;

        let mut series = TimeSeries::new("ndvi");
        series.insert(SceneKey::new(2019, 4), raster(array![[0u8, 30]]));
        let mut bases = SeasonalBases::default();
        bases.insert(BaseMosaic {
            season: Season::Spring,
            label: "base_unknown".to_string(),
            raster: raster(array![[77u8, 77]]),
            sample_count: 1,
        });

        let p = GapFillPipeline::new(IndexKind::Ndbi, InterpolationParams::default());
        let scenes = p.fill_year(2019, &series, &bases).unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].report.seasonal_base, 0);
        assert_eq!(scenes[0].report.remaining, 1);
        assert_eq!(scenes[0].raster.valid(0, 0), None);
    }

    #[test]
    fn test_grid_mismatch_is_error() {
        let mut target = raster(array![[0u8, 0]]);
        let other = raster(array![[1u8], [2]]);
        assert!(pipeline().base_fill(&mut target, &other).is_err());
    }

    #[test]
    fn test_ambiguous_index_skips_interpolation() {
        let gt = GeoTransform::from_gdal([0.0, 10.0, 0.0, 0.0, 0.0, -10.0]);
        let mut data = Array2::<u8>::from_elem((3, 3), 40);
        data[[1, 1]] = 255;
        let mut target = MaskedRaster::from_sentinel(data, 255, gt, String::new());

        let p = GapFillPipeline::new(IndexKind::Ndbi, InterpolationParams::default());
        assert_eq!(p.spatial_fill(&mut target), 0);
        assert_eq!(target.valid(1, 1), None);
    }
}
