use crate::core::series::SceneSource;
use crate::io::discovery::quality_sibling;
use crate::types::{
    AcquisitionDescriptor, GeoTransform, IndexKind, MaskedRaster, MosaicError, MosaicResult,
    Pixel, SceneKey, Window,
};
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags, Metadata};
use ndarray::Array2;
use num_traits::{NumCast, ToPrimitive};
use std::collections::BTreeMap;
use std::path::Path;

/// Pyramid factors built on merged mosaics
pub const OVERVIEW_FACTORS: [i32; 9] = [2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Spatial metadata of a raster file, read without loading pixels
#[derive(Debug, Clone)]
pub struct GridInfo {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: String,
    pub nodata: Option<f64>,
}

pub fn read_grid_info<P: AsRef<Path>>(path: P) -> MosaicResult<GridInfo> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let rasterband = dataset.rasterband(1)?;

    Ok(GridInfo {
        width,
        height,
        transform: GeoTransform::from_gdal(dataset.geo_transform()?),
        crs: dataset.projection(),
        nodata: rasterband.no_data_value(),
    })
}

/// Read `window` of band 1. The mask comes from the band's nodata value,
/// or `default_nodata` when the file declares none.
pub fn read_window<T: Pixel, P: AsRef<Path>>(
    path: P,
    window: &Window,
    default_nodata: T,
) -> MosaicResult<MaskedRaster<T>> {
    let dataset = Dataset::open(path.as_ref())?;
    let window = window.clamped_to(dataset.raster_size()).ok_or_else(|| {
        MosaicError::InvalidFormat(format!(
            "Window {:?} lies outside {}",
            window,
            path.as_ref().display()
        ))
    })?;

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband
        .no_data_value()
        .and_then(|v| <T as NumCast>::from(v))
        .unwrap_or(default_nodata);
    let buffer = rasterband.read_as::<T>(
        (window.col_off as isize, window.row_off as isize),
        (window.width, window.height),
        (window.width, window.height),
        None,
    )?;
    let data = Array2::from_shape_vec((window.height, window.width), buffer.data)?;
    let transform =
        GeoTransform::from_gdal(dataset.geo_transform()?).shifted(window.col_off, window.row_off);

    log::debug!(
        "Read {}x{} window at ({}, {}) from {}",
        window.width,
        window.height,
        window.col_off,
        window.row_off,
        path.as_ref().display()
    );
    Ok(MaskedRaster::from_sentinel(data, nodata, transform, dataset.projection()))
}

/// Read a whole single-band raster
pub fn read_raster<T: Pixel, P: AsRef<Path>>(path: P, default_nodata: T) -> MosaicResult<MaskedRaster<T>> {
    let info = read_grid_info(path.as_ref())?;
    read_window(path, &Window::new(0, 0, info.width, info.height), default_nodata)
}

fn creation_options() -> [RasterCreationOption<'static>; 3] {
    [
        RasterCreationOption { key: "COMPRESS", value: "LZW" },
        RasterCreationOption { key: "PREDICTOR", value: "2" },
        RasterCreationOption { key: "BIGTIFF", value: "YES" },
    ]
}

/// Create an empty single-band GeoTIFF with the standard output encoding
pub fn create_geotiff<T: Pixel, P: AsRef<Path>>(
    path: P,
    width: usize,
    height: usize,
    transform: &GeoTransform,
    crs: &str,
    nodata: T,
) -> MosaicResult<Dataset> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type_with_options::<T, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
        &creation_options(),
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    if !crs.is_empty() {
        dataset.set_projection(crs)?;
    }
    let mut rasterband = dataset.rasterband(1)?;
    rasterband.set_no_data_value(nodata.to_f64())?;
    drop(rasterband);
    Ok(dataset)
}

/// Write a raster, nodata sentinel under the mask
pub fn write_masked<T: Pixel, P: AsRef<Path>>(path: P, raster: &MaskedRaster<T>) -> MosaicResult<()> {
    let (rows, cols) = raster.dim();
    log::debug!("Writing {}x{} raster to {}", cols, rows, path.as_ref().display());

    let dataset = create_geotiff(path.as_ref(), cols, rows, &raster.transform, &raster.crs, raster.nodata)?;
    write_block(&dataset, (0, 0), raster.to_sentinel_array())
}

/// Write `block` into band 1 with its upper-left pixel at `offset` (col, row)
pub fn write_block<T: Pixel>(dataset: &Dataset, offset: (isize, isize), block: Array2<T>) -> MosaicResult<()> {
    let (rows, cols) = block.dim();
    let mut rasterband = dataset.rasterband(1)?;
    let flat: Vec<T> = block.into_iter().collect();
    let buffer = Buffer::new((cols, rows), flat);
    rasterband.write(offset, (cols, rows), &buffer)?;
    Ok(())
}

/// Nearest-neighbour overviews, tagged the way rasterio tags them
pub fn build_overviews<P: AsRef<Path>>(path: P) -> MosaicResult<()> {
    log::info!("Building overviews for {}", path.as_ref().display());
    let mut dataset = Dataset::open_ex(
        path.as_ref(),
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
            ..Default::default()
        },
    )?;
    dataset.build_overviews("NEAREST", &OVERVIEW_FACTORS, &[])?;
    dataset.set_metadata_item("resampling", "nearest", "rio_overview")?;
    Ok(())
}

/// Replace the sentinel-derived mask with the quality-flag raster's mask
pub fn apply_quality_override(
    raster: &mut MaskedRaster<u8>,
    quality: &MaskedRaster<u8>,
    nodata: u8,
) -> MosaicResult<()> {
    if raster.dim() != quality.dim() {
        return Err(MosaicError::InvalidFormat(format!(
            "Quality raster shape {:?} does not match {:?}",
            quality.dim(),
            raster.dim()
        )));
    }
    raster.mask.assign(&quality.mask);
    raster.nodata = nodata;
    ndarray::Zip::from(&mut raster.data)
        .and(&raster.mask)
        .for_each(|v, &m| {
            if m {
                *v = nodata;
            }
        });
    Ok(())
}

/// Reads one tile window straight out of each archive composite
pub struct GdalSceneSource {
    index: IndexKind,
    window: Window,
    scenes: BTreeMap<SceneKey, AcquisitionDescriptor>,
}

impl GdalSceneSource {
    pub fn new(index: IndexKind, window: Window, descriptors: &[AcquisitionDescriptor]) -> Self {
        let scenes = descriptors
            .iter()
            .filter(|d| d.index == index)
            .map(|d| (d.key(), d.clone()))
            .collect();
        Self { index, window, scenes }
    }
}

impl SceneSource for GdalSceneSource {
    fn keys(&self) -> Vec<SceneKey> {
        self.scenes.keys().copied().collect()
    }

    fn read(&self, key: SceneKey) -> MosaicResult<Option<MaskedRaster<u8>>> {
        let Some(descriptor) = self.scenes.get(&key) else {
            return Ok(None);
        };
        if !descriptor.path.exists() {
            log::warn!("Composite {} missing at {}", key, descriptor.path.display());
            return Ok(None);
        }

        let mut raster = read_window(&descriptor.path, &self.window, self.index.default_nodata())?;
        if self.index.sentinel_ambiguous() {
            let quality_path = quality_sibling(&descriptor.path, self.index);
            let quality = read_window::<u8, _>(&quality_path, &self.window, 0)?;
            apply_quality_override(&mut raster, &quality, self.index.default_nodata())?;
        }
        Ok(Some(raster))
    }

    fn name(&self, key: SceneKey) -> String {
        self.scenes
            .get(&key)
            .map(|d| d.file_name())
            .unwrap_or_else(|| format!("{}_{}.tif", self.index, key))
    }
}
