use anyhow::{Context, Result};
use geo::{BoundingRect, ConvexHull, Geometry};
use geos::{Geom, Geometry as GeosGeometry};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::BgtConfig;
use crate::error::BgtError;
use crate::geo_core::BoundingBox;
use crate::geometric::bgt_layer::{BgtFeature, BgtLayer, GeometryFamily};

/// Shape the downloaded layers are cut to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ClipMode {
    /// Area of interest buffered by the buffer distance
    #[default]
    #[serde(rename = "buffer")]
    #[value(name = "buffer")]
    Buffer,
    /// Bounding box of the area of interest grown by the buffer distance
    #[serde(rename = "bbox")]
    #[value(name = "bbox")]
    BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSettings {
    pub mode: ClipMode,
    /// Metres, in RD New
    pub distance: f64,
    pub quadrant_segments: i32,
}

impl ClipSettings {
    pub fn from_config(config: &BgtConfig) -> Self {
        ClipSettings {
            mode: config.clip_mode,
            distance: config.buffer_distance,
            quadrant_segments: config.buffer_segments,
        }
    }

    /// Build the clip mask around `area` (RD New coordinates)
    pub fn clip_mask(&self, area: &Geometry<f64>) -> Result<ClipMask> {
        let geometry = match self.mode {
            ClipMode::Buffer => {
                let geos_area: GeosGeometry = area
                    .clone()
                    .try_into()
                    .context("Failed to convert area of interest to GEOS")?;
                let buffered = geos_area
                    .buffer(self.distance, self.quadrant_segments)
                    .context("Failed to buffer area of interest")?;
                let geometry: Geometry<f64> = buffered
                    .try_into()
                    .context("Failed to convert buffered area from GEOS")?;
                geometry
            }
            ClipMode::BoundingBox => {
                let rect = area.bounding_rect().ok_or_else(|| {
                    BgtError::InvalidGeometry("area of interest has no extent".to_string())
                })?;
                Geometry::Polygon(BoundingBox::from_rect(rect).grow(self.distance).to_polygon())
            }
        };

        match geometry {
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Ok(ClipMask { geometry }),
            other => Err(BgtError::InvalidGeometry(format!(
                "clip mask is not a polygon: {:?}",
                other
            ))
            .into()),
        }
    }
}

/// Polygon every output feature is cut to
#[derive(Debug, Clone, PartialEq)]
pub struct ClipMask {
    pub geometry: Geometry<f64>,
}

impl ClipMask {
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(BoundingBox::from_rect)
    }

    /// Polygon sent to PDOK as geofilter: the mask itself, or its convex hull
    /// when the mask has several parts.
    pub fn geofilter_wkt(&self) -> Result<String> {
        let filter = match &self.geometry {
            Geometry::MultiPolygon(mp) if mp.0.len() > 1 => Geometry::Polygon(mp.convex_hull()),
            Geometry::MultiPolygon(mp) if mp.0.len() == 1 => Geometry::Polygon(mp.0[0].clone()),
            other => other.clone(),
        };
        let geos_filter: GeosGeometry = filter
            .try_into()
            .context("Failed to convert geofilter to GEOS")?;
        geos_filter
            .to_wkt_precision(3)
            .context("Failed to convert geofilter to WKT")
    }

    fn to_geos(&self) -> Result<GeosGeometry> {
        self.geometry
            .clone()
            .try_into()
            .context("Failed to convert clip mask to GEOS")
    }

    /// Keep the features that intersect the mask, cut to the mask.
    ///
    /// Attributes are kept as they are. Each cut is normalised to the geometry
    /// family of its own source feature, so layers that mix points, lines and
    /// polygons keep all of them. A feature GEOS cannot handle is logged and
    /// left out; so is a cut that leaves nothing of the feature's family
    /// (a polygon touching the mask along an edge, for instance).
    pub fn clip_features(&self, layer: &BgtLayer) -> Result<Vec<BgtFeature>> {
        let mask = self.to_geos()?;
        let mut clipped = Vec::new();

        for feature in &layer.features {
            let geometry: GeosGeometry = match feature.geometry.clone().try_into() {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!("{}: feature {:?} not converted: {}", layer.name, feature.fid, e);
                    continue;
                }
            };

            match geometry.intersects(&mask) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!("{}: feature {:?} not tested: {}", layer.name, feature.fid, e);
                    continue;
                }
            }

            let intersection = match geometry.intersection(&mask) {
                Ok(intersection) => intersection,
                Err(e) => {
                    warn!("{}: feature {:?} not clipped: {}", layer.name, feature.fid, e);
                    continue;
                }
            };
            if intersection.is_empty().unwrap_or(true) {
                continue;
            }
            let clipped_geo: Geometry<f64> = match intersection.try_into() {
                Ok(g) => g,
                Err(_) => continue,
            };

            let clipped_geo = match GeometryFamily::of(&feature.geometry) {
                Some(family) => match family.normalize(clipped_geo) {
                    Some(g) => g,
                    None => {
                        debug!(
                            "{}: feature {:?} leaves no {:?} inside the mask",
                            layer.name, feature.fid, family
                        );
                        continue;
                    }
                },
                None => clipped_geo,
            };

            clipped.push(BgtFeature {
                fid: feature.fid,
                geometry: clipped_geo,
                attributes: feature.attributes.clone(),
            });
        }

        debug!(
            "{}: {} of {} features inside the clip mask",
            layer.name,
            clipped.len(),
            layer.len()
        );
        Ok(clipped)
    }

    /// Clipped copy of `layer` under the same name. The family is taken from
    /// what is left after the cut.
    pub fn clip_layer(&self, layer: &BgtLayer) -> Result<BgtLayer> {
        let features = self.clip_features(layer)?;
        let mut clipped = BgtLayer::new(&layer.name, features);
        clipped.epsg = layer.epsg;
        Ok(clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::bgt_layer::AttributeValue;
    use geo::{line_string, point, polygon, Area};

    fn square(x: f64, y: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ])
    }

    fn feature(id: u64, geometry: Geometry<f64>) -> BgtFeature {
        BgtFeature {
            fid: Some(id),
            geometry,
            attributes: vec![(
                "gml_id".to_string(),
                AttributeValue::Text(format!("f{}", id)),
            )],
        }
    }

    fn settings(mode: ClipMode, distance: f64) -> ClipSettings {
        ClipSettings {
            mode,
            distance,
            quadrant_segments: 1,
        }
    }

    #[test]
    fn test_clip_mode_default() {
        assert_eq!(ClipMode::default(), ClipMode::Buffer);
        assert_eq!(
            ClipSettings::from_config(&BgtConfig::default()),
            settings(ClipMode::Buffer, 200.0)
        );
    }

    #[test]
    fn test_bbox_mask() {
        let area = square(100.0, 100.0, 10.0);
        let mask = settings(ClipMode::BoundingBox, 5.0).clip_mask(&area).unwrap();
        assert_eq!(mask.bbox(), Some(BoundingBox::new(95.0, 95.0, 115.0, 115.0)));
        assert_eq!(mask.geometry.unsigned_area(), 400.0);
    }

    #[test]
    fn test_buffer_mask() {
        let area = square(0.0, 0.0, 10.0);
        let mask = settings(ClipMode::Buffer, 2.0).clip_mask(&area).unwrap();
        // One segment per quadrant cuts the corners: 10x10 + 4 sides of 10x2 + 4 triangles of 2
        assert!((mask.geometry.unsigned_area() - 188.0).abs() < 1e-6);
        assert_eq!(mask.bbox(), Some(BoundingBox::new(-2.0, -2.0, 12.0, 12.0)));
    }

    #[test]
    fn test_point_area_buffer() {
        let area = Geometry::Point(point!(x: 0.0, y: 0.0));
        let mask = ClipSettings {
            mode: ClipMode::Buffer,
            distance: 1.0,
            quadrant_segments: 8,
        }
        .clip_mask(&area)
        .unwrap();
        assert!(matches!(mask.geometry, Geometry::Polygon(_)));
    }

    #[test]
    fn test_clip_polygon_layer() {
        let mask = settings(ClipMode::BoundingBox, 0.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        let layer = BgtLayer::new(
            "pand",
            vec![
                feature(1, square(2.0, 2.0, 2.0)),
                feature(2, square(8.0, 8.0, 4.0)),
                feature(3, square(50.0, 50.0, 1.0)),
                feature(4, square(10.0, 0.0, 2.0)),
            ],
        );

        let clipped = mask.clip_layer(&layer).unwrap();
        assert_eq!(clipped.name, "pand");
        assert_eq!(clipped.family, Some(GeometryFamily::Polygon));
        // feature 4 only touches the mask edge and leaves no polygon
        assert_eq!(clipped.len(), 2);

        assert_eq!(clipped.features[0].fid, Some(1));
        assert!((clipped.features[0].geometry.unsigned_area() - 4.0).abs() < 1e-9);
        assert_eq!(
            clipped.features[1].attribute("gml_id"),
            Some(&AttributeValue::Text("f2".to_string()))
        );
        assert!((clipped.features[1].geometry.unsigned_area() - 4.0).abs() < 1e-9);
        assert!(clipped
            .features
            .iter()
            .all(|f| matches!(f.geometry, Geometry::MultiPolygon(_))));
    }

    #[test]
    fn test_clip_line_layer() {
        let mask = settings(ClipMode::BoundingBox, 0.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        let layer = BgtLayer::new(
            "scheiding",
            vec![feature(
                7,
                Geometry::LineString(line_string![(x: -5.0, y: 5.0), (x: 15.0, y: 5.0)]),
            )],
        );

        let clipped = mask.clip_features(&layer).unwrap();
        assert_eq!(clipped.len(), 1);
        match &clipped[0].geometry {
            Geometry::MultiLineString(mls) => {
                assert_eq!(mls.0.len(), 1);
                let xs: Vec<f64> = mls.0[0].coords().map(|c| c.x).collect();
                assert!(xs.iter().all(|x| (0.0..=10.0).contains(x)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_clip_mixed_layer_keeps_every_family() {
        let mask = settings(ClipMode::BoundingBox, 0.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        // polygon first, then a line and a point that lie inside the mask
        let layer = BgtLayer::new(
            "kunstwerkdeel",
            vec![
                feature(1, square(2.0, 2.0, 2.0)),
                feature(
                    2,
                    Geometry::LineString(line_string![(x: 1.0, y: 1.0), (x: 9.0, y: 1.0)]),
                ),
                feature(3, Geometry::Point(point!(x: 5.0, y: 5.0))),
                feature(4, square(10.0, 0.0, 2.0)),
            ],
        );
        assert!(layer.is_mixed());

        let clipped = mask.clip_layer(&layer).unwrap();
        assert_eq!(clipped.name, "kunstwerkdeel");
        assert_eq!(clipped.family, None);
        assert!(clipped.is_mixed());
        assert_eq!(clipped.len(), 3);
        assert!(matches!(clipped.features[0].geometry, Geometry::MultiPolygon(_)));
        match &clipped.features[1].geometry {
            Geometry::MultiLineString(mls) => {
                assert_eq!(mls.0.len(), 1);
                assert_eq!(mls.0[0].0.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(clipped.features[2].geometry, Geometry::Point(point!(x: 5.0, y: 5.0)));
        assert_eq!(clipped.features[2].fid, Some(3));
    }

    #[test]
    fn test_clip_mixed_layer_family_after_cut() {
        let mask = settings(ClipMode::BoundingBox, 0.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        let layer = BgtLayer::new(
            "kunstwerkdeel",
            vec![
                feature(1, Geometry::Point(point!(x: 50.0, y: 50.0))),
                feature(2, square(2.0, 2.0, 2.0)),
            ],
        );
        let clipped = mask.clip_layer(&layer).unwrap();
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped.family, Some(GeometryFamily::Polygon));
    }

    #[test]
    fn test_clip_point_layer() {
        let mask = settings(ClipMode::Buffer, 1.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        let layer = BgtLayer::new(
            "paal",
            vec![
                feature(1, Geometry::Point(point!(x: 5.0, y: 5.0))),
                feature(2, Geometry::Point(point!(x: 30.0, y: 5.0))),
            ],
        );
        let clipped = mask.clip_features(&layer).unwrap();
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped[0].geometry, Geometry::Point(point!(x: 5.0, y: 5.0)));
    }

    #[test]
    fn test_geofilter_wkt() {
        let mask = settings(ClipMode::BoundingBox, 0.0)
            .clip_mask(&square(0.0, 0.0, 10.0))
            .unwrap();
        let wkt = mask.geofilter_wkt().unwrap();
        assert!(wkt.starts_with("POLYGON"), "{}", wkt);

        let two_parts = ClipMask {
            geometry: Geometry::MultiPolygon(geo::MultiPolygon::new(vec![
                polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)],
                polygon![(x: 5.0, y: 5.0), (x: 6.0, y: 5.0), (x: 6.0, y: 6.0), (x: 5.0, y: 5.0)],
            ])),
        };
        assert!(two_parts.geofilter_wkt().unwrap().starts_with("POLYGON"));
    }
}
