use crate::types::{MosaicError, MosaicResult};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{BoundingRect, Geometry, MultiPolygon, Rect};
use std::path::Path;

/// National boundary polygon(s), loaded once and shared read-only by every tile
#[derive(Debug, Clone)]
pub struct NationalBoundary {
    pub polygons: MultiPolygon<f64>,
}

impl NationalBoundary {
    /// Load the first feature of the first layer of a vector file
    pub fn load<P: AsRef<Path>>(path: P) -> MosaicResult<Self> {
        log::info!("Loading boundary from {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let mut layer = dataset.layer(0)?;
        let mut features = layer.features();
        let feature = features.next().ok_or_else(|| {
            MosaicError::Geometry(format!("{} has no features", path.as_ref().display()))
        })?;
        let geometry = feature.geometry_by_index(0)?.to_geo()?;
        Self::from_geometry(geometry)
    }

    pub fn from_geometry(geometry: Geometry<f64>) -> MosaicResult<Self> {
        let polygons = match geometry {
            Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            Geometry::MultiPolygon(mp) => mp,
            _ => {
                return Err(MosaicError::Geometry(
                    "Boundary must be a polygon or multipolygon".to_string(),
                ))
            }
        };
        if polygons.0.is_empty() {
            return Err(MosaicError::Geometry("Boundary is empty".to_string()));
        }
        Ok(Self { polygons })
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.polygons.bounding_rect()
    }
}
