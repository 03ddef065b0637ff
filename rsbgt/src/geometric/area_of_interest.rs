use anyhow::{Context, Result};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use geo::{BoundingRect, Geometry};
use geos::{Geom, Geometry as GeosGeometry};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::collect::global_variables::PDOK_API_EPSG;
use crate::error::BgtError;
use crate::geo_core::{BoundingBox, GeoCore};
use crate::geometric::linearize::Linearizer;

/// Where the polygon of interest comes from
#[derive(Debug, Clone, PartialEq)]
pub enum AreaSource {
    /// Any vector file GDAL can open. Without `feature_index` the first
    /// feature with a geometry is used. `epsg` overrides the layer's CRS.
    Vector {
        path: PathBuf,
        feature_index: Option<u64>,
        epsg: Option<i32>,
    },
    Wkt { wkt: String, epsg: i32 },
    BoundingBox { bbox: BoundingBox, epsg: i32 },
}

/// Polygon (or multipolygon) the download is built around
#[derive(Debug, Clone, PartialEq)]
pub struct AreaOfInterest {
    pub geometry: Geometry<f64>,
    pub epsg: i32,
}

impl AreaOfInterest {
    pub fn load(source: &AreaSource) -> Result<Self> {
        match source {
            AreaSource::Vector {
                path,
                feature_index,
                epsg,
            } => AreaOfInterest::from_vector(path, *feature_index, *epsg),
            AreaSource::Wkt { wkt, epsg } => AreaOfInterest::from_wkt(wkt, *epsg),
            AreaSource::BoundingBox { bbox, epsg } => AreaOfInterest::from_bbox(*bbox, *epsg),
        }
    }

    pub fn new(geometry: Geometry<f64>, epsg: i32) -> Result<Self> {
        Ok(AreaOfInterest {
            geometry: ensure_polygonal(geometry)?,
            epsg,
        })
    }

    pub fn from_wkt(wkt: &str, epsg: i32) -> Result<Self> {
        let geos_geom = GeosGeometry::new_from_wkt(wkt)
            .map_err(|e| BgtError::InvalidGeometry(format!("cannot parse WKT: {}", e)))?;
        if geos_geom.is_empty().unwrap_or(true) {
            return Err(BgtError::NoAreaOfInterest("WKT input".to_string()).into());
        }
        let geometry: Geometry<f64> = geos_geom
            .try_into()
            .context("Failed to convert WKT geometry from GEOS")?;
        AreaOfInterest::new(geometry, epsg)
    }

    pub fn from_bbox(bbox: BoundingBox, epsg: i32) -> Result<Self> {
        if !bbox.is_valid() {
            return Err(BgtError::InvalidUserInput(format!(
                "invalid bounding box {:?}",
                bbox
            ))
            .into());
        }
        AreaOfInterest::new(Geometry::Polygon(bbox.to_polygon()), epsg)
    }

    /// Read one feature of a vector file
    pub fn from_vector(path: &Path, feature_index: Option<u64>, epsg: Option<i32>) -> Result<Self> {
        let dataset = Dataset::open(path)
            .with_context(|| format!("Failed to open vector file {:?}", path))?;
        let linearizer = Linearizer::default();

        for mut layer in dataset.layers() {
            let geometry = match feature_index {
                Some(fid) => match layer.feature(fid) {
                    Some(feature) => match feature.geometry() {
                        Some(geometry) if !geometry.is_empty() => {
                            Some(linearizer.to_geo(geometry)?)
                        }
                        _ => None,
                    },
                    None => None,
                },
                None => {
                    let mut found = None;
                    for feature in layer.features() {
                        if let Some(geometry) = feature.geometry() {
                            if !geometry.is_empty() {
                                debug!("Using feature {:?} of {:?}", feature.fid(), path);
                                found = Some(linearizer.to_geo(geometry)?);
                                break;
                            }
                        }
                    }
                    found
                }
            };

            let Some(geometry) = geometry else {
                continue;
            };

            let epsg = match epsg {
                Some(epsg) => epsg,
                None => {
                    let srs = layer.spatial_ref().with_context(|| {
                        format!("{:?} has no spatial reference, pass an EPSG code", path)
                    })?;
                    srs.auth_code().with_context(|| {
                        format!("Cannot determine the EPSG code of {:?}", path)
                    })?
                }
            };

            let area = AreaOfInterest::new(geometry, epsg)?;
            info!("Area of interest read from {:?} (EPSG:{})", path, area.epsg);
            return Ok(area);
        }

        Err(BgtError::NoAreaOfInterest(path.display().to_string()).into())
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(BoundingBox::from_rect)
    }

    /// Same area in another CRS
    pub fn transform(&self, to_epsg: i32) -> Result<Self> {
        Ok(AreaOfInterest {
            geometry: GeoCore::transform_geometry(self.epsg, to_epsg, &self.geometry)?,
            epsg: to_epsg,
        })
    }

    /// Same area in the CRS the PDOK API expects for its geofilter
    pub fn to_api_crs(&self) -> Result<Self> {
        self.transform(PDOK_API_EPSG)
    }
}

fn ensure_polygonal(geometry: Geometry<f64>) -> Result<Geometry<f64>> {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Ok(geometry),
        Geometry::Rect(rect) => Ok(Geometry::Polygon(rect.to_polygon())),
        other => Err(BgtError::InvalidGeometry(format!(
            "area of interest must be a polygon, got {}",
            geometry_name(&other)
        ))
        .into()),
    }
}

fn geometry_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
