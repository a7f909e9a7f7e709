use crate::types::{saturating_round, MaskedRaster, MosaicError, MosaicResult, Pixel};
use ndarray::Array2;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Distance-limited inpainting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpolationParams {
    /// Maximum distance (pixels) searched for a valid neighbour
    pub max_search_distance: f64,
    /// 3x3 smoothing passes over the interpolated pixels
    pub smoothing_iterations: usize,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            max_search_distance: 100.0,
            smoothing_iterations: 3,
        }
    }
}

impl InterpolationParams {
    pub fn validate(&self) -> MosaicResult<()> {
        if !(self.max_search_distance >= 1.0) {
            return Err(MosaicError::Config(format!(
                "Search distance must be at least one pixel, got {}",
                self.max_search_distance
            )));
        }
        Ok(())
    }
}

/// Which already-scanned neighbour closes a quadrant pass
#[derive(Debug, Clone, Copy)]
enum Closing {
    PreviousColumn,
    PreviousRow,
}

/// Quadrant passes as (rows bottom-up, columns right-to-left, closing neighbour).
/// Together they partition the plane around a pixel: up-left `r <= i, c < j`,
/// up-right `r < i, c >= j`, down-right `r >= i, c > j`, down-left `r > i, c <= j`.
const QUADRANTS: [(bool, bool, Closing); 4] = [
    (false, false, Closing::PreviousColumn),
    (false, true, Closing::PreviousRow),
    (true, true, Closing::PreviousColumn),
    (true, false, Closing::PreviousRow),
];

/// Inverse-distance inpainting of masked pixels from the nearest valid
/// pixel in each of four quadrants, followed by 3x3 smoothing of the filled pixels.
pub struct SpatialInterpolator {
    params: InterpolationParams,
}

impl SpatialInterpolator {
    pub fn new(params: InterpolationParams) -> Self {
        Self { params }
    }

    /// Fill masked pixels in place, clamping results to `valid_range`.
    /// Returns the number of pixels resolved.
    pub fn fill<T: Pixel>(&self, raster: &mut MaskedRaster<T>, valid_range: (T, T)) -> usize {
        let (rows, cols) = raster.dim();
        let masked = raster.masked_count();
        if masked == 0 || masked == rows * cols {
            return 0;
        }

        let valid = raster.mask.mapv(|m| !m);
        let values = raster
            .data
            .mapv(|v| v.to_f64().unwrap_or(0.0) as f32);

        let mut sum_w = Array2::<f32>::zeros((rows, cols));
        let mut sum_wv = Array2::<f32>::zeros((rows, cols));
        for quadrant in QUADRANTS {
            self.accumulate_quadrant(&values, &valid, quadrant, &mut sum_w, &mut sum_wv);
        }

        let mut filled = Array2::from_elem((rows, cols), false);
        let mut estimate = values;
        for i in 0..rows {
            for j in 0..cols {
                if !valid[[i, j]] && sum_w[[i, j]] > 0.0 {
                    estimate[[i, j]] = sum_wv[[i, j]] / sum_w[[i, j]];
                    filled[[i, j]] = true;
                }
            }
        }

        for _ in 0..self.params.smoothing_iterations {
            estimate = smooth_filled(&estimate, &valid, &filled);
        }

        let lo = valid_range.0.to_f64().unwrap_or(f64::MIN);
        let hi = valid_range.1.to_f64().unwrap_or(f64::MAX);
        let mut count = 0;
        for i in 0..rows {
            for j in 0..cols {
                if filled[[i, j]] {
                    let v = (estimate[[i, j]] as f64).clamp(lo, hi);
                    if raster.fill_pixel(i, j, saturating_round(v)) {
                        count += 1;
                    }
                }
            }
        }

        log::debug!(
            "Interpolated {} of {} masked pixels (search distance {})",
            count,
            masked,
            self.params.max_search_distance
        );
        count
    }

    /// Propagate the nearest valid pixel through one quadrant scan, row by row,
    /// and add its inverse-square-distance weighted value to every masked pixel
    /// it lies within the search distance of.
    fn accumulate_quadrant(
        &self,
        values: &Array2<f32>,
        valid: &Array2<bool>,
        (rows_up, cols_left, closing): (bool, bool, Closing),
        sum_w: &mut Array2<f32>,
        sum_wv: &mut Array2<f32>,
    ) {
        let (rows, cols) = values.dim();
        let max_sq = self.params.max_search_distance * self.params.max_search_distance;
        let row_order: Vec<usize> = if rows_up {
            (0..rows).rev().collect()
        } else {
            (0..rows).collect()
        };
        let col_order: Vec<usize> = if cols_left {
            (0..cols).rev().collect()
        } else {
            (0..cols).collect()
        };

        // Nearest valid pixel of the closed region behind each pixel of the previous row
        let mut previous: Vec<Option<(usize, usize)>> = vec![None; cols];
        for &i in &row_order {
            let mut current: Vec<Option<(usize, usize)>> = vec![None; cols];
            let mut last: Option<(usize, usize)> = None;
            for &j in &col_order {
                if !valid[[i, j]] {
                    let hit = match closing {
                        Closing::PreviousColumn => last,
                        Closing::PreviousRow => previous[j],
                    };
                    if let Some((vi, vj)) = hit {
                        let d2 = distance_sq((i, j), (vi, vj));
                        if d2 <= max_sq {
                            let w = (1.0 / d2) as f32;
                            sum_w[[i, j]] += w;
                            sum_wv[[i, j]] += w * values[[vi, vj]];
                        }
                    }
                }

                let nearest = if valid[[i, j]] {
                    Some((i, j))
                } else {
                    closer((i, j), last, previous[j])
                };
                current[j] = nearest;
                last = nearest;
            }
            previous = current;
        }
    }
}

fn distance_sq(a: (usize, usize), b: (usize, usize)) -> f64 {
    let di = a.0 as f64 - b.0 as f64;
    let dj = a.1 as f64 - b.1 as f64;
    di * di + dj * dj
}

/// Candidate nearer to `at`
fn closer(
    at: (usize, usize),
    a: Option<(usize, usize)>,
    b: Option<(usize, usize)>,
) -> Option<(usize, usize)> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if distance_sq(at, b) < distance_sq(at, a) { b } else { a }),
        (a, None) => a,
        (None, b) => b,
    }
}

/// One 3x3 mean pass applied only to interpolated pixels
fn smooth_filled(estimate: &Array2<f32>, valid: &Array2<bool>, filled: &Array2<bool>) -> Array2<f32> {
    let (rows, cols) = estimate.dim();
    let mut out = estimate.clone();
    for i in 0..rows {
        for j in 0..cols {
            if !filled[[i, j]] {
                continue;
            }
            let mut sum = 0.0f64;
            let mut count = 0usize;
            for wi in i.saturating_sub(1)..(i + 2).min(rows) {
                for wj in j.saturating_sub(1)..(j + 2).min(cols) {
                    if valid[[wi, wj]] || filled[[wi, wj]] {
                        sum += estimate[[wi, wj]] as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                out[[i, j]] = (sum / count as f64) as f32;
            }
        }
    }
    out
}
