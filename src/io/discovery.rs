//! Archive discovery: turns `<root>/<year>/<INDEX>/` listings into descriptors

use crate::types::{AcquisitionDescriptor, IndexKind, MosaicError, MosaicResult, SceneKey};
use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Day-of-month that closes a first-half composite
const HALF_MONTH_END_DAY: u32 = 15;

fn file_pattern() -> MosaicResult<Regex> {
    Regex::new(r"^(?P<prefix>.+?)_(?P<index>[A-Za-z]+)_(?P<start>\d{8})_(?P<end>\d{8})\.tif$")
        .map_err(|e| MosaicError::Config(format!("Invalid discovery pattern: {}", e)))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Parse one archive file name. Returns `None` for names that do not follow
/// `<prefix>_<index>_<YYYYMMDD>_<YYYYMMDD>.tif` or carry another index.
pub fn parse_file_name(pattern: &Regex, path: &Path, index: IndexKind) -> Option<AcquisitionDescriptor> {
    let name = path.file_name()?.to_str()?;
    let caps = pattern.captures(name)?;
    if !caps["index"].eq_ignore_ascii_case(index.token()) {
        return None;
    }
    let start = parse_date(&caps["start"])?;
    let end = parse_date(&caps["end"])?;
    if end < start {
        return None;
    }

    Some(AcquisitionDescriptor {
        index,
        year: start.year(),
        start,
        end,
        path: path.to_path_buf(),
    })
}

/// Half-month composites are superseded by the monthly ones
pub fn is_half_month(descriptor: &AcquisitionDescriptor) -> bool {
    descriptor.end.day() == HALF_MONTH_END_DAY
}

/// List every monthly composite of `index` for `years` under `root`.
///
/// Missing year folders are skipped with a warning. When two files map to the
/// same (year, month) the first in name order wins.
pub fn discover_archive<P: AsRef<Path>>(
    root: P,
    index: IndexKind,
    years: &[i32],
) -> MosaicResult<Vec<AcquisitionDescriptor>> {
    let pattern = file_pattern()?;
    let mut found: BTreeMap<SceneKey, AcquisitionDescriptor> = BTreeMap::new();

    for &year in years {
        let dir = root.as_ref().join(year.to_string()).join(index.dir_name());
        if !dir.is_dir() {
            log::warn!("No {} folder for {} at {}", index.dir_name(), year, dir.display());
            continue;
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(descriptor) = parse_file_name(&pattern, &path, index) else {
                log::debug!("Ignoring {}", path.display());
                continue;
            };
            if is_half_month(&descriptor) {
                log::debug!("Dropping half-month composite {}", path.display());
                continue;
            }
            let key = descriptor.key();
            if let Some(existing) = found.get(&key) {
                log::warn!(
                    "{} duplicates {} for {}, keeping the first",
                    path.display(),
                    existing.path.display(),
                    key
                );
                continue;
            }
            found.insert(key, descriptor);
        }
    }

    log::info!("Discovered {} {} composites", found.len(), index);
    Ok(found.into_values().collect())
}

/// Quality-flag raster shipped next to a composite: the index token swapped for `meta`
pub fn quality_sibling(path: &Path, index: IndexKind) -> PathBuf {
    let swap = |s: &str| {
        s.replace(index.token(), "meta")
            .replace(&index.dir_name(), "META")
    };
    let file_name = path
        .file_name()
        .map(|n| swap(&n.to_string_lossy()))
        .unwrap_or_default();
    match path.parent() {
        Some(parent) => {
            let parent_name = parent.file_name().map(|n| swap(&n.to_string_lossy()));
            let dir = match (parent.parent(), parent_name) {
                (Some(grand), Some(name)) => grand.join(name),
                _ => parent.to_path_buf(),
            };
            dir.join(file_name)
        }
        None => PathBuf::from(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        let pattern = file_pattern().unwrap();
        let path = Path::new("/archive/2019/NDVI/s2_ndvi_20190601_20190630.tif");
        let d = parse_file_name(&pattern, path, IndexKind::Ndvi).unwrap();
        assert_eq!(d.year, 2019);
        assert_eq!(d.month(), 6);
        assert_eq!(d.file_name(), "s2_ndvi_20190601_20190630.tif");

        assert!(parse_file_name(&pattern, path, IndexKind::Ndmi).is_none());
        assert!(parse_file_name(&pattern, Path::new("s2_ndvi_20190601_20190630.vrt"), IndexKind::Ndvi).is_none());
        assert!(parse_file_name(&pattern, Path::new("s2_ndvi_20190631_20190630.tif"), IndexKind::Ndvi).is_none());
    }

    #[test]
    fn test_month_follows_end_date() {
        let pattern = file_pattern().unwrap();
        let d = parse_file_name(
            &pattern,
            Path::new("s2_ndvi_20180916_20181015.tif"),
            IndexKind::Ndvi,
        )
        .unwrap();
        assert_eq!(d.key(), SceneKey::new(2018, 10));
        assert!(is_half_month(&d));
    }

    #[test]
    fn test_discover_archive() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let ndvi_2018 = root.join("2018").join("NDVI");
        touch(&ndvi_2018, "s2_ndvi_20180401_20180430.tif");
        touch(&ndvi_2018, "s2_ndvi_20180401_20180415.tif");
        touch(&ndvi_2018, "s2_ndvi_20180501_20180531.tif");
        touch(&ndvi_2018, "notes.txt");
        touch(&root.join("2019").join("NDVI"), "s2_ndvi_20190701_20190731.tif");
        touch(&root.join("2019").join("NDMI"), "s2_ndmi_20190701_20190731.tif");

        let found = discover_archive(root, IndexKind::Ndvi, &[2017, 2018, 2019]).unwrap();
        let keys: Vec<SceneKey> = found.iter().map(|d| d.key()).collect();
        assert_eq!(
            keys,
            vec![SceneKey::new(2018, 4), SceneKey::new(2018, 5), SceneKey::new(2019, 7)]
        );
    }

    #[test]
    fn test_quality_sibling() {
        let path = Path::new("/archive/2020/NDBI/s2_ndbi_20200601_20200630.tif");
        assert_eq!(
            quality_sibling(path, IndexKind::Ndbi),
            PathBuf::from("/archive/2020/META/s2_meta_20200601_20200630.tif")
        );
    }
}
