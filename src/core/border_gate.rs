use crate::types::{GeoTransform, Window};
use geo::{Coord, LineString, MultiPolygon, Polygon, Relate};

/// How a tile relates to the national boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// No overlap: the tile is discarded
    Outside,
    /// Straddles the border: outputs are clipped
    PartiallyInside,
    FullyInside,
}

impl Coverage {
    pub fn needs_clipping(&self) -> bool {
        matches!(self, Coverage::PartiallyInside)
    }
}

/// Georeferenced footprint of a pixel window, built from its four transformed corners
pub fn tile_footprint(transform: &GeoTransform, width: usize, height: usize) -> Polygon<f64> {
    let (w, h) = (width as f64, height as f64);
    let ring: Vec<Coord<f64>> = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h), (0.0, 0.0)]
        .iter()
        .map(|&(c, r)| {
            let (x, y) = transform.apply(c, r);
            Coord { x, y }
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}

/// Decides whether a tile is worth processing
pub struct BorderGate<'a> {
    boundary: &'a MultiPolygon<f64>,
}

impl<'a> BorderGate<'a> {
    pub fn new(boundary: &'a MultiPolygon<f64>) -> Self {
        Self { boundary }
    }

    /// A footprint that only shares an edge or a corner with the boundary has
    /// no area to keep and counts as outside
    pub fn classify(&self, footprint: &Polygon<f64>) -> Coverage {
        let matrix = footprint.relate(self.boundary);
        if !matrix.is_intersects() || matrix.is_touches() {
            Coverage::Outside
        } else if matrix.is_within() {
            Coverage::FullyInside
        } else {
            Coverage::PartiallyInside
        }
    }

    /// Classify `window` of a grid whose full-extent transform is `grid`
    pub fn classify_window(&self, grid: &GeoTransform, window: &Window) -> Coverage {
        let transform = grid.shifted(window.col_off, window.row_off);
        let coverage = self.classify(&tile_footprint(&transform, window.width, window.height));
        log::debug!(
            "Window {}_{} classified as {:?}",
            window.col_off,
            window.row_off,
            coverage
        );
        coverage
    }
}
