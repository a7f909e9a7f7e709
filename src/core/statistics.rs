use crate::types::{saturating_round, MaskedRaster, MosaicError, MosaicResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Sentinel written to the yearly sum for pixels without samples
pub const SUM_NODATA: i16 = -1;
/// Sentinel written to the amplitude for pixels without samples
pub const AMPLITUDE_NODATA: i16 = -999;

/// Reference value subtracted from the yearly maximum to give the amplitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeReference {
    /// The year's own 25th percentile
    #[default]
    Quantile25,
    /// A fixed low percentile of the full archive (see `BaseMosaicBuilder::build_base_value`)
    BaseValue,
}

/// Yearly reductions written per tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatKind {
    Mean,
    Median,
    Min,
    Max,
    Sum,
    Quantile10,
    Quantile25,
    Amplitude,
}

impl StatKind {
    pub const ALL: [StatKind; 8] = [
        StatKind::Mean,
        StatKind::Median,
        StatKind::Min,
        StatKind::Max,
        StatKind::Sum,
        StatKind::Quantile10,
        StatKind::Quantile25,
        StatKind::Amplitude,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            StatKind::Mean => "mean.tif",
            StatKind::Median => "median.tif",
            StatKind::Min => "min.tif",
            StatKind::Max => "max.tif",
            StatKind::Sum => "sum.tif",
            StatKind::Quantile10 => "quantile_10.tif",
            StatKind::Quantile25 => "quantile_25.tif",
            StatKind::Amplitude => "amp.tif",
        }
    }

    pub fn from_file_name(name: &str) -> Option<StatKind> {
        StatKind::ALL.into_iter().find(|k| k.file_name() == name)
    }

    /// Sum and amplitude are signed 16-bit; everything else keeps the 8-bit index encoding
    pub fn is_wide(&self) -> bool {
        matches!(self, StatKind::Sum | StatKind::Amplitude)
    }
}

/// A statistic raster in its own output dtype
#[derive(Debug, Clone)]
pub enum StatRaster {
    U8(MaskedRaster<u8>),
    I16(MaskedRaster<i16>),
}

impl StatRaster {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            StatRaster::U8(r) => r.dim(),
            StatRaster::I16(r) => r.dim(),
        }
    }
}

/// Per-tile, per-year collection of reduction rasters
#[derive(Debug, Clone)]
pub struct StatisticsSet {
    pub year: i32,
    pub layers: Vec<(StatKind, StatRaster)>,
}

impl StatisticsSet {
    pub fn get(&self, kind: StatKind) -> Option<&StatRaster> {
        self.layers.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    pub fn u8_layer(&self, kind: StatKind) -> Option<&MaskedRaster<u8>> {
        match self.get(kind) {
            Some(StatRaster::U8(r)) => Some(r),
            _ => None,
        }
    }

    pub fn i16_layer(&self, kind: StatKind) -> Option<&MaskedRaster<i16>> {
        match self.get(kind) {
            Some(StatRaster::I16(r)) => Some(r),
            _ => None,
        }
    }
}

/// Percentile of an ascending slice with linear interpolation between order statistics
pub fn percentile_linear(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Pixelwise reductions over one year of filled monthly rasters
pub struct StatisticsEngine {
    amplitude: AmplitudeReference,
}

impl StatisticsEngine {
    pub fn new(amplitude: AmplitudeReference) -> Self {
        Self { amplitude }
    }

    /// Reduce `months` along the time axis, excluding masked entries.
    ///
    /// 8-bit outputs use the inputs' nodata sentinel; sum and amplitude carry
    /// `SUM_NODATA` and `AMPLITUDE_NODATA`. `base_value` is required by the
    /// fixed-base amplitude policy.
    pub fn compute(
        &self,
        year: i32,
        months: &[&MaskedRaster<u8>],
        base_value: Option<&MaskedRaster<u8>>,
    ) -> MosaicResult<StatisticsSet> {
        let first: &MaskedRaster<u8> = *months.first().ok_or_else(|| {
            MosaicError::Processing(format!("No monthly rasters for year {}", year))
        })?;
        if let Some(other) = months.iter().find(|m| !m.same_grid(first)) {
            return Err(MosaicError::Processing(format!(
                "Monthly raster grid {:?} differs from {:?} in year {}",
                other.dim(),
                first.dim(),
                year
            )));
        }
        let base_value = match (self.amplitude, base_value) {
            (AmplitudeReference::BaseValue, None) => {
                return Err(MosaicError::Config(
                    "Fixed-base amplitude requested without a base value raster".to_string(),
                ))
            }
            (AmplitudeReference::BaseValue, Some(b)) if !b.same_grid(first) => {
                return Err(MosaicError::Processing(
                    "Base value raster does not match the monthly grid".to_string(),
                ))
            }
            (AmplitudeReference::BaseValue, b) => b,
            (AmplitudeReference::Quantile25, _) => None,
        };

        log::debug!("Computing statistics for {} from {} months", year, months.len());

        let shape = first.dim();
        let nodata = first.nodata;
        let mut narrow: Vec<(StatKind, Array2<u8>)> = [
            StatKind::Mean,
            StatKind::Median,
            StatKind::Min,
            StatKind::Max,
            StatKind::Quantile10,
            StatKind::Quantile25,
        ]
        .into_iter()
        .map(|k| (k, Array2::from_elem(shape, nodata)))
        .collect();
        let mut sum = Array2::from_elem(shape, SUM_NODATA);
        let mut amplitude = Array2::from_elem(shape, AMPLITUDE_NODATA);
        let mut empty = Array2::from_elem(shape, true);
        let mut amplitude_mask = Array2::from_elem(shape, true);

        let mut samples: Vec<f64> = Vec::with_capacity(months.len());
        for i in 0..shape.0 {
            for j in 0..shape.1 {
                samples.clear();
                samples.extend(months.iter().filter_map(|m| m.valid(i, j)).map(f64::from));
                if samples.is_empty() {
                    continue;
                }
                samples.sort_by(|a, b| a.total_cmp(b));
                empty[[i, j]] = false;

                let n = samples.len() as f64;
                let total: f64 = samples.iter().sum();
                let min = samples[0];
                let max = samples[samples.len() - 1];
                let q25 = percentile_linear(&samples, 25.0).unwrap_or(min);
                let values = [
                    total / n,
                    percentile_linear(&samples, 50.0).unwrap_or(min),
                    min,
                    max,
                    percentile_linear(&samples, 10.0).unwrap_or(min),
                    q25,
                ];
                for ((_, layer), v) in narrow.iter_mut().zip(values) {
                    layer[[i, j]] = saturating_round(v);
                }
                sum[[i, j]] = saturating_round(total);

                let reference = match base_value {
                    Some(base) => base.valid(i, j).map(f64::from),
                    None => Some(f64::from(saturating_round::<u8>(q25))),
                };
                if let Some(r) = reference {
                    amplitude[[i, j]] = saturating_round(max - r);
                    amplitude_mask[[i, j]] = false;
                }
            }
        }

        let mut layers = Vec::with_capacity(StatKind::ALL.len());
        for (kind, data) in narrow {
            let raster = MaskedRaster::new(data, empty.clone(), nodata, first.transform, first.crs.clone())?;
            layers.push((kind, StatRaster::U8(raster)));
        }
        layers.push((
            StatKind::Sum,
            StatRaster::I16(MaskedRaster::new(
                sum,
                empty,
                SUM_NODATA,
                first.transform,
                first.crs.clone(),
            )?),
        ));
        layers.push((
            StatKind::Amplitude,
            StatRaster::I16(MaskedRaster::new(
                amplitude,
                amplitude_mask,
                AMPLITUDE_NODATA,
                first.transform,
                first.crs.clone(),
            )?),
        ));

        Ok(StatisticsSet { year, layers })
    }
}
