//! Stitches per-tile outputs into national rasters

use crate::core::statistics::StatKind;
use crate::io::raster::{create_geotiff, read_grid_info, read_raster, write_block, GridInfo};
use crate::io::sink::{BASE_DIR, INTERP_PREFIX, STATS_PREFIX};
use crate::types::{GeoTransform, MosaicError, MosaicResult, Pixel, Season};
use num_traits::NumCast;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// One national output and the tile files that cover it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    /// Signed 16-bit output (sum, amplitude)
    pub wide: bool,
}

impl MergeJob {
    pub fn run(&self) -> MosaicResult<()> {
        log::info!("Merging {} tiles into {}", self.inputs.len(), self.output.display());
        if self.wide {
            merge_tiles::<i16>(&self.inputs, &self.output)
        } else {
            merge_tiles::<u8>(&self.inputs, &self.output)
        }
    }
}

fn sorted_entries(dir: &Path) -> MosaicResult<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Tile subtrees of `index_root` whose names start with `prefix`
fn tile_dirs(index_root: &Path, prefix: &str) -> MosaicResult<Vec<PathBuf>> {
    Ok(sorted_entries(index_root)?
        .into_iter()
        .filter(|p| p.is_dir() && file_name(p).starts_with(prefix))
        .collect())
}

/// Group `<tile_dir>/<year>/<name>` files by year and file name
fn year_jobs(
    dirs: &[PathBuf],
    year: i32,
    output_dir: &Path,
    wide: impl Fn(&str) -> bool,
) -> MosaicResult<Vec<MergeJob>> {
    let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for dir in dirs {
        let year_dir = dir.join(year.to_string());
        if !year_dir.is_dir() {
            continue;
        }
        for path in sorted_entries(&year_dir)? {
            if path.extension().map_or(false, |e| e == "tif") {
                grouped.entry(file_name(&path)).or_default().push(path);
            }
        }
    }

    Ok(grouped
        .into_iter()
        .map(|(name, inputs)| MergeJob {
            wide: wide(&name),
            output: output_dir.join(year.to_string()).join(&name),
            inputs,
        })
        .collect())
}

/// Every merge the tile outputs under `index_root` call for
pub fn plan_merge_jobs(index_root: &Path, product_years: &[i32]) -> MosaicResult<Vec<MergeJob>> {
    let mut jobs = Vec::new();

    let base_dir = index_root.join(BASE_DIR);
    if base_dir.is_dir() {
        let bases = sorted_entries(&base_dir)?;
        for season in Season::ALL {
            let prefix = format!("base_{}_", season.label());
            let inputs: Vec<PathBuf> = bases
                .iter()
                .filter(|p| file_name(p).starts_with(&prefix))
                .cloned()
                .collect();
            if !inputs.is_empty() {
                jobs.push(MergeJob {
                    inputs,
                    output: index_root.join(format!("base_{}.tif", season.label())),
                    wide: false,
                });
            }
        }
    }

    let interp = tile_dirs(index_root, INTERP_PREFIX)?;
    let stats = tile_dirs(index_root, STATS_PREFIX)?;
    for &year in product_years {
        jobs.extend(year_jobs(&interp, year, &index_root.join("interp"), |_| false)?);
        jobs.extend(year_jobs(&stats, year, &index_root.join("stats"), |name| {
            StatKind::from_file_name(name).map_or(false, |k| k.is_wide())
        })?);
    }
    Ok(jobs)
}

/// Union extent of co-aligned grids, as (transform, width, height)
fn union_grid(infos: &[GridInfo]) -> MosaicResult<(GeoTransform, usize, usize)> {
    let first = infos
        .first()
        .ok_or_else(|| MosaicError::Processing("Nothing to merge".to_string()))?;
    let (pw, ph) = (first.transform.pixel_width, first.transform.pixel_height);

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for info in infos {
        let t = &info.transform;
        if t.pixel_width != pw || t.pixel_height != ph || t.rotation_x != 0.0 || t.rotation_y != 0.0 {
            return Err(MosaicError::InvalidFormat(
                "Tiles do not share a north-up pixel grid".to_string(),
            ));
        }
        let (x0, y0) = t.apply(0.0, 0.0);
        let (x1, y1) = t.apply(info.width as f64, info.height as f64);
        min_x = min_x.min(x0.min(x1));
        max_x = max_x.max(x0.max(x1));
        min_y = min_y.min(y0.min(y1));
        max_y = max_y.max(y0.max(y1));
    }

    let transform = GeoTransform {
        top_left_x: if pw > 0.0 { min_x } else { max_x },
        top_left_y: if ph < 0.0 { max_y } else { min_y },
        ..first.transform
    };
    let width = ((max_x - min_x) / pw.abs()).round() as usize;
    let height = ((max_y - min_y) / ph.abs()).round() as usize;
    Ok((transform, width, height))
}

/// Write every input at its pixel offset in the union grid; uncovered pixels stay nodata
pub fn merge_tiles<T: Pixel>(inputs: &[PathBuf], output: &Path) -> MosaicResult<()> {
    let infos = inputs
        .iter()
        .map(|p| read_grid_info(p))
        .collect::<MosaicResult<Vec<_>>>()?;
    let (transform, width, height) = union_grid(&infos)?;
    let first = &infos[0];
    let nodata: T = first
        .nodata
        .and_then(|v| <T as NumCast>::from(v))
        .ok_or_else(|| {
            MosaicError::InvalidFormat(format!("{} declares no usable nodata", inputs[0].display()))
        })?;

    let dataset = create_geotiff(output, width, height, &transform, &first.crs, nodata)?;
    for (path, info) in inputs.iter().zip(&infos) {
        let offset = transform.offset_of(&info.transform).ok_or_else(|| {
            MosaicError::InvalidFormat(format!("{} is not aligned to the merge grid", path.display()))
        })?;
        let mut tile = read_raster::<T, _>(path, nodata)?;
        tile.nodata = nodata;
        write_block(&dataset, offset, tile.to_sentinel_array())?;
    }
    Ok(())
}

/// Remove the per-tile subtrees once their content is merged
pub fn remove_tile_outputs(index_root: &Path) -> MosaicResult<()> {
    let mut dirs: BTreeSet<PathBuf> = tile_dirs(index_root, INTERP_PREFIX)?.into_iter().collect();
    dirs.extend(tile_dirs(index_root, STATS_PREFIX)?);
    let base_dir = index_root.join(BASE_DIR);
    if base_dir.is_dir() {
        dirs.insert(base_dir);
    }
    for dir in dirs {
        log::debug!("Removing {}", dir.display());
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::write_masked;
    use crate::types::MaskedRaster;
    use ndarray::Array2;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_plan_groups_by_year_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("base_mosaics/base_spring_0_0.tif"));
        touch(&root.join("base_mosaics/base_spring_9900_0.tif"));
        touch(&root.join("interp_0_0/2019/a.tif"));
        touch(&root.join("interp_9900_0/2019/a.tif"));
        touch(&root.join("interp_9900_0/2020/b.tif"));
        touch(&root.join("stats_0_0/2019/sum.tif"));
        touch(&root.join("stats_0_0/2019/mean.tif"));

        let jobs = plan_merge_jobs(root, &[2019]).unwrap();
        let outputs: Vec<PathBuf> = jobs.iter().map(|j| j.output.strip_prefix(root).unwrap().to_path_buf()).collect();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("base_spring.tif"),
                PathBuf::from("interp/2019/a.tif"),
                PathBuf::from("stats/2019/mean.tif"),
                PathBuf::from("stats/2019/sum.tif"),
            ]
        );
        assert_eq!(jobs[0].inputs.len(), 2);
        assert_eq!(jobs[1].inputs.len(), 2);
        assert!(!jobs[2].wide);
        assert!(jobs[3].wide);

        remove_tile_outputs(root).unwrap();
        assert!(!root.join("interp_0_0").exists());
        assert!(!root.join("base_mosaics").exists());
    }

    #[test]
    fn test_merge_places_tiles_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let grid = GeoTransform::from_gdal([1000.0, 10.0, 0.0, 5000.0, 0.0, -10.0]);
        let left = MaskedRaster::from_sentinel(Array2::from_elem((4, 3), 11u8), 0, grid, String::new());
        // Right tile is shorter, as a clipped tile would be
        let right = MaskedRaster::from_sentinel(Array2::from_elem((2, 2), 22u8), 0, grid.shifted(3, 1), String::new());
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        write_masked(&a, &left).unwrap();
        write_masked(&b, &right).unwrap();

        let out = dir.path().join("merged.tif");
        MergeJob { inputs: vec![a, b], output: out.clone(), wide: false }.run().unwrap();

        let merged = read_raster::<u8, _>(&out, 0).unwrap();
        assert_eq!(merged.dim(), (4, 5));
        assert_eq!(merged.transform, grid);
        assert_eq!(merged.valid(0, 0), Some(11));
        assert_eq!(merged.valid(1, 3), Some(22));
        assert_eq!(merged.valid(2, 4), Some(22));
        assert_eq!(merged.valid(0, 4), None);
        assert_eq!(merged.valid(3, 3), None);
    }
}
