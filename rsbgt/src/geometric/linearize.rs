//! Conversion of OGR geometries, including the curved types found in BGT GML
//! (arcs, compound curves, curve polygons), into linear `geo` geometries.

use anyhow::Result;
use gdal::vector::Geometry as GdalGeometry;
use geo::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use std::f64::consts::PI;

use crate::error::BgtError;

/// GDAL strokes arcs with a 4 degree step by default
pub const DEFAULT_ARC_STEP_DEGREES: f64 = 4.0;
/// Smallest accepted arc step
pub const MIN_ARC_STEP_DEGREES: f64 = 0.01;
/// A full circle stroked at the smallest step
const MAX_ARC_SEGMENTS: usize = 36_000;

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;
const WKB_CIRCULARSTRING: u32 = 8;
const WKB_COMPOUNDCURVE: u32 = 9;
const WKB_CURVEPOLYGON: u32 = 10;
const WKB_MULTICURVE: u32 = 11;
const WKB_MULTISURFACE: u32 = 12;
const WKB_TRIANGLE: u32 = 17;
const WKB_LINEARRING: u32 = 101;

/// Strip the 2.5D flag and the ISO Z/M offsets from an OGR type code
pub fn flatten_type(geometry_type: u32) -> u32 {
    let ty = geometry_type & 0x7fff_ffff;
    if ty == WKB_LINEARRING {
        ty
    } else {
        ty % 1000
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Linearizer {
    /// Maximum angle between two stroked vertices, radians
    max_step: f64,
}

impl Default for Linearizer {
    fn default() -> Self {
        Linearizer::new(DEFAULT_ARC_STEP_DEGREES)
    }
}

impl Linearizer {
    pub fn new(arc_step_degrees: f64) -> Self {
        Linearizer {
            max_step: arc_step_degrees.max(MIN_ARC_STEP_DEGREES).to_radians(),
        }
    }

    pub fn to_geo(&self, geom: &GdalGeometry) -> Result<Geometry<f64>> {
        let ty = flatten_type(geom.geometry_type());
        let geometry = match ty {
            WKB_POINT => Geometry::Point(point(geom)?),
            WKB_LINESTRING | WKB_LINEARRING | WKB_CIRCULARSTRING | WKB_COMPOUNDCURVE => {
                Geometry::LineString(LineString::new(self.curve_coords(geom)?))
            }
            WKB_POLYGON | WKB_CURVEPOLYGON | WKB_TRIANGLE => Geometry::Polygon(self.surface(geom)?),
            WKB_MULTIPOINT => {
                let mut points = Vec::with_capacity(geom.geometry_count());
                for i in 0..geom.geometry_count() {
                    points.push(point(&geom.get_geometry(i))?);
                }
                Geometry::MultiPoint(MultiPoint::new(points))
            }
            WKB_MULTILINESTRING | WKB_MULTICURVE => {
                let mut lines = Vec::with_capacity(geom.geometry_count());
                for i in 0..geom.geometry_count() {
                    lines.push(LineString::new(self.curve_coords(&geom.get_geometry(i))?));
                }
                Geometry::MultiLineString(MultiLineString::new(lines))
            }
            WKB_MULTIPOLYGON | WKB_MULTISURFACE => {
                let mut polygons = Vec::with_capacity(geom.geometry_count());
                for i in 0..geom.geometry_count() {
                    polygons.push(self.surface(&geom.get_geometry(i))?);
                }
                Geometry::MultiPolygon(MultiPolygon::new(polygons))
            }
            WKB_GEOMETRYCOLLECTION => {
                let mut parts = Vec::with_capacity(geom.geometry_count());
                for i in 0..geom.geometry_count() {
                    parts.push(self.to_geo(&geom.get_geometry(i))?);
                }
                Geometry::GeometryCollection(GeometryCollection(parts))
            }
            _ => {
                return Err(BgtError::InvalidGeometry(format!(
                    "unsupported geometry type {}",
                    geom.geometry_name()
                ))
                .into())
            }
        };
        Ok(geometry)
    }

    fn curve_coords(&self, geom: &GdalGeometry) -> Result<Vec<Coord<f64>>> {
        match flatten_type(geom.geometry_type()) {
            WKB_LINESTRING | WKB_LINEARRING => Ok(coords(geom)),
            WKB_CIRCULARSTRING => Ok(stroke_circular_string(&coords(geom), self.max_step)),
            WKB_COMPOUNDCURVE => {
                let mut out: Vec<Coord<f64>> = Vec::new();
                for i in 0..geom.geometry_count() {
                    let part = self.curve_coords(&geom.get_geometry(i))?;
                    let skip = match (out.last(), part.first()) {
                        (Some(last), Some(first)) if last == first => 1,
                        _ => 0,
                    };
                    out.extend(part.into_iter().skip(skip));
                }
                Ok(out)
            }
            _ => Err(BgtError::InvalidGeometry(format!(
                "{} is not a curve",
                geom.geometry_name()
            ))
            .into()),
        }
    }

    fn surface(&self, geom: &GdalGeometry) -> Result<Polygon<f64>> {
        let ring_count = geom.geometry_count();
        if ring_count == 0 {
            return Err(BgtError::InvalidGeometry("polygon without rings".to_string()).into());
        }
        let exterior = LineString::new(self.curve_coords(&geom.get_geometry(0))?);
        let mut interiors = Vec::with_capacity(ring_count - 1);
        for i in 1..ring_count {
            interiors.push(LineString::new(self.curve_coords(&geom.get_geometry(i))?));
        }
        Ok(Polygon::new(exterior, interiors))
    }
}

fn coords(geom: &GdalGeometry) -> Vec<Coord<f64>> {
    geom.get_point_vec()
        .into_iter()
        .map(|(x, y, _)| Coord { x, y })
        .collect()
}

fn point(geom: &GdalGeometry) -> Result<Point<f64>> {
    coords(geom)
        .first()
        .map(|c| Point::from(*c))
        .ok_or_else(|| BgtError::InvalidGeometry("empty point".to_string()).into())
}

/// Stroke a circular string: consecutive (start, mid, end) triples sharing end points
pub fn stroke_circular_string(points: &[Coord<f64>], max_step: f64) -> Vec<Coord<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut out = vec![points[0]];
    let mut i = 0;
    while i + 2 < points.len() {
        let arc = stroke_arc(points[i], points[i + 1], points[i + 2], max_step);
        out.extend(arc.into_iter().skip(1));
        i += 2;
    }
    out
}

/// Vertices of the arc from `p0` through `p1` to `p2`, both ends included.
/// `p0 == p2` describes a full circle with `p1` diametrically opposite.
pub fn stroke_arc(p0: Coord<f64>, p1: Coord<f64>, p2: Coord<f64>, max_step: f64) -> Vec<Coord<f64>> {
    let (center, sweep) = if p0 == p2 {
        let center = Coord {
            x: (p0.x + p1.x) / 2.0,
            y: (p0.y + p1.y) / 2.0,
        };
        (center, 2.0 * PI)
    } else {
        // circumcentre relative to p0, RD coordinates are too large to square directly
        let (bx, by) = (p1.x - p0.x, p1.y - p0.y);
        let (cx, cy) = (p2.x - p0.x, p2.y - p0.y);
        let d = 2.0 * (bx * cy - by * cx);
        let scale = cx.abs().max(cy.abs()).max(f64::MIN_POSITIVE);
        if d.abs() <= 1e-12 * scale * scale {
            // collinear: no circle through the three points
            return vec![p0, p1, p2];
        }
        let b2 = bx * bx + by * by;
        let c2 = cx * cx + cy * cy;
        let center = Coord {
            x: p0.x + (cy * b2 - by * c2) / d,
            y: p0.y + (bx * c2 - cx * b2) / d,
        };
        let a0 = (p0.y - center.y).atan2(p0.x - center.x);
        let a2 = (p2.y - center.y).atan2(p2.x - center.x);
        // d > 0: p0, p1, p2 turn counter-clockwise
        let sweep = if d > 0.0 {
            positive_angle(a2 - a0)
        } else {
            -positive_angle(a0 - a2)
        };
        (center, sweep)
    };

    let radius = ((p0.x - center.x).powi(2) + (p0.y - center.y).powi(2)).sqrt();
    let start = (p0.y - center.y).atan2(p0.x - center.x);
    let segments = ((sweep.abs() / max_step).ceil() as usize).clamp(2, MAX_ARC_SEGMENTS);

    let mut out = Vec::with_capacity(segments + 1);
    out.push(p0);
    for i in 1..segments {
        let angle = start + sweep * (i as f64) / (segments as f64);
        out.push(Coord {
            x: center.x + radius * angle.cos(),
            y: center.y + radius * angle.sin(),
        });
    }
    out.push(p2);
    out
}

/// Angle folded into (0, 2π]
fn positive_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(2.0 * PI);
    if a == 0.0 {
        2.0 * PI
    } else {
        a
    }
}
