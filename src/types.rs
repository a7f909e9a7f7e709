use chrono::{Datelike, NaiveDate};
use gdal::raster::GdalType;
use ndarray::Array2;
use num_traits::{Bounded, NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::PathBuf;
use std::str::FromStr;

/// Pixel value types a `MaskedRaster` can carry (u8 index values, i16 statistics)
pub trait Pixel:
    Copy + PartialOrd + Debug + Send + Sync + NumCast + Bounded + GdalType + 'static
{
}

impl<T> Pixel for T where
    T: Copy + PartialOrd + Debug + Send + Sync + NumCast + Bounded + GdalType + 'static
{
}

/// Convert a float to `T`: round half away from zero, then saturate to `T`'s range.
pub fn saturating_round<T: Pixel>(value: f64) -> T {
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    let v = if value.is_nan() { lo } else { value.round().clamp(lo, hi) };
    <T as NumCast>::from(v).unwrap_or_else(T::min_value)
}

/// Geospatial transformation parameters (GDAL affine ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a (fractional) pixel corner position to georeferenced coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Transform of a window whose upper-left pixel is (col_off, row_off)
    pub fn shifted(&self, col_off: usize, row_off: usize) -> Self {
        let (x, y) = self.apply(col_off as f64, row_off as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// Pixel offset of `other`'s origin inside this grid, if it lands on a pixel corner
    pub fn offset_of(&self, other: &GeoTransform) -> Option<(isize, isize)> {
        let col = (other.top_left_x - self.top_left_x) / self.pixel_width;
        let row = (other.top_left_y - self.top_left_y) / self.pixel_height;
        let (c, r) = (col.round(), row.round());
        if (col - c).abs() > 1e-6 || (row - r).abs() > 1e-6 {
            return None;
        }
        Some((c as isize, r as isize))
    }
}

/// Rectangular pixel window over the full-extent grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// Clip the window to a raster of `size` (width, height)
    pub fn clamped_to(&self, size: (usize, usize)) -> Option<Window> {
        if self.col_off >= size.0 || self.row_off >= size.1 {
            return None;
        }
        Some(Window {
            width: self.width.min(size.0 - self.col_off),
            height: self.height.min(size.1 - self.row_off),
            ..*self
        })
    }
}

/// A single-band raster with a co-indexed validity mask.
///
/// `mask[[i, j]] == true` means the pixel is excluded: its `data` value is never
/// read by statistics or used as a fill source. Fill stages only ever flip mask
/// entries from `true` to `false`.
#[derive(Debug, Clone)]
pub struct MaskedRaster<T> {
    pub data: Array2<T>,
    pub mask: Array2<bool>,
    pub nodata: T,
    pub transform: GeoTransform,
    pub crs: String,
}

impl<T: Pixel> MaskedRaster<T> {
    pub fn new(
        data: Array2<T>,
        mask: Array2<bool>,
        nodata: T,
        transform: GeoTransform,
        crs: String,
    ) -> MosaicResult<Self> {
        if data.dim() != mask.dim() {
            return Err(MosaicError::InvalidFormat(format!(
                "Mask shape {:?} does not match data shape {:?}",
                mask.dim(),
                data.dim()
            )));
        }
        Ok(Self { data, mask, nodata, transform, crs })
    }

    /// Build a raster whose mask is derived from the nodata sentinel
    pub fn from_sentinel(data: Array2<T>, nodata: T, transform: GeoTransform, crs: String) -> Self {
        let mask = data.mapv(|v| v == nodata);
        Self { data, mask, nodata, transform, crs }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn masked_count(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Pixel value when valid
    pub fn valid(&self, row: usize, col: usize) -> Option<T> {
        if self.mask[[row, col]] {
            None
        } else {
            Some(self.data[[row, col]])
        }
    }

    /// Resolve a masked pixel. Already-valid pixels are left untouched.
    pub fn fill_pixel(&mut self, row: usize, col: usize, value: T) -> bool {
        if !self.mask[[row, col]] {
            return false;
        }
        self.data[[row, col]] = value;
        self.mask[[row, col]] = false;
        true
    }

    /// Pixel values with the nodata sentinel written under the mask
    pub fn to_sentinel_array(&self) -> Array2<T> {
        let mut out = self.data.clone();
        ndarray::Zip::from(&mut out)
            .and(&self.mask)
            .for_each(|v, &m| {
                if m {
                    *v = self.nodata;
                }
            });
        out
    }

    pub fn same_grid<U>(&self, other: &MaskedRaster<U>) -> bool {
        self.data.dim() == other.data.dim() && self.transform == other.transform
    }
}

/// Normalized difference indices handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Ndvi,
    Ndmi,
    Ndbi,
    Ndsi,
}

impl IndexKind {
    /// Lowercase filename token
    pub fn token(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "ndvi",
            IndexKind::Ndmi => "ndmi",
            IndexKind::Ndbi => "ndbi",
            IndexKind::Ndsi => "ndsi",
        }
    }

    /// Archive directory name (`<year>/<INDEX>/`)
    pub fn dir_name(&self) -> String {
        self.token().to_uppercase()
    }

    /// 0 is a legitimate value for this index, so validity comes from the quality-flag raster
    pub fn sentinel_ambiguous(&self) -> bool {
        matches!(self, IndexKind::Ndbi)
    }

    pub fn default_nodata(&self) -> u8 {
        if self.sentinel_ambiguous() {
            255
        } else {
            0
        }
    }

    /// Inclusive range of encoded values a filled pixel may take
    pub fn valid_range(&self) -> (u8, u8) {
        if self.sentinel_ambiguous() {
            (0, 254)
        } else {
            (1, 255)
        }
    }

    /// Spatial interpolation is skipped when the sentinel overlaps valid values
    pub fn interpolates(&self) -> bool {
        !self.sentinel_ambiguous()
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for IndexKind {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ndvi" => Ok(IndexKind::Ndvi),
            "ndmi" => Ok(IndexKind::Ndmi),
            "ndbi" => Ok(IndexKind::Ndbi),
            "ndsi" => Ok(IndexKind::Ndsi),
            other => Err(MosaicError::Config(format!("Unknown index: {}", other))),
        }
    }
}

/// Climatological seasons with a base mosaic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Season {
    /// Composites ending in April or May
    Spring,
    /// Composites ending in October (mid-September to October coverage)
    Autumn,
}

impl Season {
    pub const ALL: [Season; 2] = [Season::Spring, Season::Autumn];

    pub fn label(&self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Autumn => "autumn",
        }
    }

    /// Recognise a base mosaic label such as `base_spring_9900_0`
    pub fn from_label(label: &str) -> Option<Season> {
        if label.contains("spring") {
            Some(Season::Spring)
        } else if label.contains("autumn") {
            Some(Season::Autumn)
        } else {
            None
        }
    }

    /// Calendar months whose rasters this season's base mosaic fills
    pub fn fill_months(&self) -> &'static [u32] {
        match self {
            Season::Spring => &[4, 5],
            Season::Autumn => &[10],
        }
    }

    pub fn contains_month(&self, month: u32) -> bool {
        self.fill_months().contains(&month)
    }
}

/// (year, month) address of one composite in a time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SceneKey {
    pub year: i32,
    pub month: u32,
}

impl SceneKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Same month, `years` years earlier
    pub fn years_back(&self, years: i32) -> Self {
        Self { year: self.year - years, month: self.month }
    }
}

impl std::fmt::Display for SceneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Parsed description of one archive file, produced once by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionDescriptor {
    pub index: IndexKind,
    pub year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub path: PathBuf,
}

impl AcquisitionDescriptor {
    /// Composites are filed under the month they end in
    pub fn month(&self) -> u32 {
        self.end.month()
    }

    pub fn key(&self) -> SceneKey {
        SceneKey::new(self.year, self.month())
    }

    /// Output file name, shared by every year of the same month slot
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}.tif", self.index, self.key()))
    }
}

/// Error types for mosaic processing
#[derive(Debug, thiserror::Error)]
pub enum MosaicError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for mosaic operations
pub type MosaicResult<T> = Result<T, MosaicError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn transform() -> GeoTransform {
        GeoTransform::from_gdal([100.0, 10.0, 0.0, 1000.0, 0.0, -10.0])
    }

    #[test]
    fn test_saturating_round() {
        assert_eq!(saturating_round::<u8>(12.5), 13);
        assert_eq!(saturating_round::<u8>(-3.0), 0);
        assert_eq!(saturating_round::<u8>(300.0), 255);
        assert_eq!(saturating_round::<i16>(-12.5), -13);
        assert_eq!(saturating_round::<i16>(f64::NAN), i16::MIN);
    }

    #[test]
    fn test_fill_pixel_only_touches_masked() {
        let mut r = MaskedRaster::from_sentinel(array![[0u8, 5], [7, 0]], 0, transform(), String::new());
        assert_eq!(r.masked_count(), 2);
        assert!(!r.fill_pixel(0, 1, 99));
        assert!(r.fill_pixel(0, 0, 42));
        assert_eq!(r.valid(0, 0), Some(42));
        assert_eq!(r.valid(0, 1), Some(5));
        assert_eq!(r.masked_count(), 1);
        assert_eq!(r.to_sentinel_array(), array![[42u8, 5], [7, 0]]);
    }

    #[test]
    fn test_transform_shift_and_offset() {
        let gt = transform();
        let shifted = gt.shifted(3, 2);
        assert_eq!(shifted.top_left_x, 130.0);
        assert_eq!(shifted.top_left_y, 980.0);
        assert_eq!(gt.offset_of(&shifted), Some((3, 2)));
    }

    #[test]
    fn test_window_clamp() {
        let w = Window::new(9900, 110_000, 9900, 10_000);
        assert_eq!(w.clamped_to((15_000, 115_000)), Some(Window::new(9900, 110_000, 5100, 5000)));
        assert_eq!(w.clamped_to((9900, 120_000)), None);
    }

    #[test]
    fn test_season_labels() {
        assert_eq!(Season::from_label("base_spring_0_0"), Some(Season::Spring));
        assert_eq!(Season::from_label("base_autumn_9900_0"), Some(Season::Autumn));
        assert_eq!(Season::from_label("base_winter"), None);
        assert!(Season::Spring.contains_month(5));
        assert!(!Season::Autumn.contains_month(9));
    }

    #[test]
    fn test_index_parsing() {
        assert_eq!("NDVI".parse::<IndexKind>().unwrap(), IndexKind::Ndvi);
        assert!("evi".parse::<IndexKind>().is_err());
        assert_eq!(IndexKind::Ndbi.default_nodata(), 255);
        assert!(!IndexKind::Ndbi.interpolates());
    }
}
