use anyhow::{Context, Result};
use geo::{Coord, Geometry, LineString, MapCoords, Polygon, Rect};
use proj::Proj;
use std::path::{Path, PathBuf};

/// Extent and output location shared by the collectors, plus CRS helpers.
/// Everything held here is in RD New (EPSG:28992).
#[derive(Debug, Clone)]
pub struct GeoCore {
    /// Extent of the clip mask, once built
    pub bbox: Option<BoundingBox>,
    /// Directory the results are written to
    pub output_path: PathBuf,
}

impl GeoCore {
    pub fn new(output_path: PathBuf) -> Self {
        GeoCore {
            bbox: None,
            output_path,
        }
    }

    pub fn get_bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub fn set_bbox(&mut self, bbox: Option<BoundingBox>) {
        self.bbox = bbox;
    }

    pub fn get_output_path(&self) -> &Path {
        &self.output_path
    }

    fn proj(from_epsg: i32, to_epsg: i32) -> Result<Proj> {
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        Proj::new_known_crs(&from_crs, &to_crs, None).with_context(|| {
            format!(
                "Failed to create Proj transformation {} -> {}",
                from_crs, to_crs
            )
        })
    }

    /// Reproject every coordinate of a geometry
    pub fn transform_geometry(
        from_epsg: i32,
        to_epsg: i32,
        geometry: &Geometry<f64>,
    ) -> Result<Geometry<f64>> {
        if from_epsg == to_epsg {
            return Ok(geometry.clone());
        }
        let proj = Self::proj(from_epsg, to_epsg)?;
        let proj = &proj;

        geometry
            .try_map_coords(|coord: Coord<f64>| {
                proj.convert((coord.x, coord.y))
                    .map(|(x, y)| Coord { x, y })
            })
            .with_context(|| {
                format!(
                    "Failed to transform geometry from EPSG:{} to EPSG:{}",
                    from_epsg, to_epsg
                )
            })
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.min_x < self.max_x
            && self.min_y < self.max_y
    }

    /// Expand every side by `distance`
    pub fn grow(&self, distance: f64) -> Self {
        BoundingBox::new(
            self.min_x - distance,
            self.min_y - distance,
            self.max_x + distance,
            self.max_y + distance,
        )
    }

    /// Closed, counter-clockwise exterior ring
    pub fn to_polygon(&self) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
                (self.min_x, self.min_y),
            ]),
            vec![],
        )
    }
}
