use crate::types::{GeoTransform, MaskedRaster, MosaicError, MosaicResult, Pixel};
use geo::{BoundingRect, Coord, MultiPolygon};
use ndarray::{s, Array2};

const EDGE_EPSILON: f64 = 1e-9;

/// Crop window and inside-polygon mask for one raster grid.
///
/// Computed once per tile and applied to every output on that grid.
#[derive(Debug, Clone)]
pub struct ClipPlan {
    pub source_transform: GeoTransform,
    pub source_dim: (usize, usize),
    /// Rows and columns kept from the source, as half-open ranges
    pub rows: (usize, usize),
    pub cols: (usize, usize),
    pub transform: GeoTransform,
    /// `true` where the pixel centre lies inside the boundary
    pub inside: Array2<bool>,
}

impl ClipPlan {
    pub fn dim(&self) -> (usize, usize) {
        (self.rows.1 - self.rows.0, self.cols.1 - self.cols.0)
    }

    /// Crop `raster` and mask everything outside the boundary
    pub fn apply<T: Pixel>(&self, raster: &MaskedRaster<T>) -> MosaicResult<MaskedRaster<T>> {
        if raster.dim() != self.source_dim || raster.transform != self.source_transform {
            return Err(MosaicError::Geometry(
                "Raster grid differs from the grid the clip was planned for".to_string(),
            ));
        }
        let (r0, r1) = self.rows;
        let (c0, c1) = self.cols;
        let mut data = raster.data.slice(s![r0..r1, c0..c1]).to_owned();
        let mut mask = raster.mask.slice(s![r0..r1, c0..c1]).to_owned();

        ndarray::Zip::from(&mut data)
            .and(&mut mask)
            .and(&self.inside)
            .for_each(|v, m, &inside| {
                if !inside {
                    *v = raster.nodata;
                    *m = true;
                }
            });

        MaskedRaster::new(data, mask, raster.nodata, self.transform, raster.crs.clone())
    }
}

/// Crops rasters to the national boundary
pub struct BoundaryClipper<'a> {
    boundary: &'a MultiPolygon<f64>,
    edges: Vec<(Coord<f64>, Coord<f64>)>,
}

impl<'a> BoundaryClipper<'a> {
    pub fn new(boundary: &'a MultiPolygon<f64>) -> Self {
        let edges = boundary
            .iter()
            .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors().iter()))
            .flat_map(|ring| ring.lines().map(|l| (l.start, l.end)))
            .collect();
        Self { boundary, edges }
    }

    /// Plan the crop of a raster with `transform` and `dim` (rows, cols)
    pub fn plan(&self, transform: &GeoTransform, dim: (usize, usize)) -> MosaicResult<ClipPlan> {
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(MosaicError::Geometry(
                "Clipping requires a north-up transform".to_string(),
            ));
        }
        let bbox = self
            .boundary
            .bounding_rect()
            .ok_or_else(|| MosaicError::Geometry("Boundary is empty".to_string()))?;

        let cols = pixel_span(
            (bbox.min().x - transform.top_left_x) / transform.pixel_width,
            (bbox.max().x - transform.top_left_x) / transform.pixel_width,
            dim.1,
        );
        let rows = pixel_span(
            (bbox.min().y - transform.top_left_y) / transform.pixel_height,
            (bbox.max().y - transform.top_left_y) / transform.pixel_height,
            dim.0,
        );
        let (Some(cols), Some(rows)) = (cols, rows) else {
            return Err(MosaicError::Geometry(
                "Boundary does not overlap the raster".to_string(),
            ));
        };

        let cropped = transform.shifted(cols.0, rows.0);
        let inside = self.rasterize(&cropped, (rows.1 - rows.0, cols.1 - cols.0));
        log::debug!(
            "Clip window rows {}..{} cols {}..{} of {:?}",
            rows.0,
            rows.1,
            cols.0,
            cols.1,
            dim
        );

        Ok(ClipPlan {
            source_transform: *transform,
            source_dim: dim,
            rows,
            cols,
            transform: cropped,
            inside,
        })
    }

    /// Crop a single raster. Clipping an already clipped raster changes nothing.
    pub fn clip<T: Pixel>(&self, raster: &MaskedRaster<T>) -> MosaicResult<MaskedRaster<T>> {
        self.plan(&raster.transform, raster.dim())?.apply(raster)
    }

    /// Even-odd scanline test of every pixel centre against the boundary rings
    fn rasterize(&self, transform: &GeoTransform, dim: (usize, usize)) -> Array2<bool> {
        let (rows, cols) = dim;
        let mut inside = Array2::from_elem(dim, false);
        let mut crossings: Vec<f64> = Vec::new();

        for r in 0..rows {
            let y = transform.top_left_y + (r as f64 + 0.5) * transform.pixel_height;
            crossings.clear();
            for (a, b) in &self.edges {
                if (a.y > y) != (b.y > y) {
                    crossings.push(a.x + (y - a.y) * (b.x - a.x) / (b.y - a.y));
                }
            }
            if crossings.is_empty() {
                continue;
            }
            crossings.sort_by(|p, q| p.total_cmp(q));

            for c in 0..cols {
                let x = transform.top_left_x + (c as f64 + 0.5) * transform.pixel_width;
                let left = crossings.partition_point(|&cx| cx < x);
                inside[[r, c]] = left % 2 == 1;
            }
        }
        inside
    }
}

/// Half-open pixel range covering fractional positions `a`..`b`, clamped to `0..len`
fn pixel_span(a: f64, b: f64, len: usize) -> Option<(usize, usize)> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let start = (lo + EDGE_EPSILON).floor().max(0.0);
    let end = (hi - EDGE_EPSILON).ceil().min(len as f64);
    if !(start < end) {
        return None;
    }
    Some((start as usize, end as usize))
}
