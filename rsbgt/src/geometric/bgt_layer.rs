use anyhow::{Context, Result};
use chrono::NaiveDate;
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{
    FieldValue, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType, ToGdal,
};
use gdal::{Dataset, DriverManager};
use geo::{Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::collect::global_variables::BGT_EPSG;
use crate::error::BgtError;
use crate::geometric::linearize::Linearizer;

/// Vector format of the written layers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum OutputFormat {
    /// ESRI Shapefile; attribute names are cut to 10 characters
    #[default]
    #[serde(rename = "shapefile")]
    #[value(name = "shapefile")]
    Shapefile,
    #[serde(rename = "gpkg")]
    #[value(name = "gpkg")]
    GeoPackage,
    #[serde(rename = "geojson")]
    #[value(name = "geojson")]
    GeoJson,
}

impl OutputFormat {
    pub fn driver_name(&self) -> &'static str {
        match self {
            OutputFormat::Shapefile => "ESRI Shapefile",
            OutputFormat::GeoPackage => "GPKG",
            OutputFormat::GeoJson => "GeoJSON",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Shapefile => "shp",
            OutputFormat::GeoPackage => "gpkg",
            OutputFormat::GeoJson => "geojson",
        }
    }

    /// Extensions of every file a dataset of this format may consist of
    pub fn file_extensions(&self) -> &'static [&'static str] {
        match self {
            OutputFormat::Shapefile => &["shp", "shx", "dbf", "prj", "cpg"],
            OutputFormat::GeoPackage => &["gpkg"],
            OutputFormat::GeoJson => &["geojson"],
        }
    }

    /// `path` with each of [`OutputFormat::file_extensions`]
    pub fn dataset_files(&self, path: &Path) -> Vec<PathBuf> {
        self.file_extensions()
            .iter()
            .map(|ext| path.with_extension(ext))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Null,
}

impl AttributeValue {
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            AttributeValue::Integer(_) => Some(FieldKind::Integer),
            AttributeValue::Real(_) => Some(FieldKind::Real),
            AttributeValue::Text(_) => Some(FieldKind::Text),
            AttributeValue::Date(_) => Some(FieldKind::Date),
            AttributeValue::Null => None,
        }
    }

    /// Value as stored in a field of type `kind`; `None` leaves the field unset
    fn to_field_value(&self, kind: FieldKind) -> Option<FieldValue> {
        match (self, kind) {
            (AttributeValue::Null, _) => None,
            (AttributeValue::Integer(v), FieldKind::Integer) => Some(FieldValue::Integer64Value(*v)),
            (AttributeValue::Integer(v), FieldKind::Real) => Some(FieldValue::RealValue(*v as f64)),
            (AttributeValue::Real(v), FieldKind::Real) => Some(FieldValue::RealValue(*v)),
            (AttributeValue::Date(v), FieldKind::Date) => Some(FieldValue::DateValue(*v)),
            (value, _) => Some(FieldValue::StringValue(value.to_string())),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Real(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => write!(f, "{}", v),
            AttributeValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            AttributeValue::Null => Ok(()),
        }
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl From<FieldValue> for AttributeValue {
    /// Lists and timestamps have no portable field type (Shapefile) and become text
    fn from(value: FieldValue) -> Self {
        #[allow(unreachable_patterns)]
        match value {
            FieldValue::IntegerValue(v) => AttributeValue::Integer(v as i64),
            FieldValue::Integer64Value(v) => AttributeValue::Integer(v),
            FieldValue::RealValue(v) => AttributeValue::Real(v),
            FieldValue::StringValue(v) => AttributeValue::Text(v),
            FieldValue::DateValue(v) => AttributeValue::Date(v),
            FieldValue::DateTimeValue(v) => AttributeValue::Text(v.to_rfc3339()),
            FieldValue::IntegerListValue(v) => AttributeValue::Text(join(&v)),
            FieldValue::Integer64ListValue(v) => AttributeValue::Text(join(&v)),
            FieldValue::RealListValue(v) => AttributeValue::Text(join(&v)),
            FieldValue::StringListValue(v) => AttributeValue::Text(v.join(",")),
            _ => AttributeValue::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
    Date,
}

impl FieldKind {
    pub fn merge(self, other: FieldKind) -> FieldKind {
        match (self, other) {
            (a, b) if a == b => a,
            (FieldKind::Integer, FieldKind::Real) | (FieldKind::Real, FieldKind::Integer) => {
                FieldKind::Real
            }
            _ => FieldKind::Text,
        }
    }

    fn ogr_type(self) -> OGRFieldType::Type {
        match self {
            FieldKind::Integer => OGRFieldType::OFTInteger64,
            FieldKind::Real => OGRFieldType::OFTReal,
            FieldKind::Text => OGRFieldType::OFTString,
            FieldKind::Date => OGRFieldType::OFTDate,
        }
    }
}

/// Attribute table layout of an output layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSchema {
    pub fields: Vec<(String, FieldKind)>,
}

impl LayerSchema {
    /// Fields in first-seen order. Fields that are null everywhere become text.
    pub fn from_features(features: &[BgtFeature]) -> Self {
        let mut fields: Vec<(String, Option<FieldKind>)> = Vec::new();
        for feature in features {
            for (name, value) in &feature.attributes {
                let index = match fields.iter().position(|(n, _)| n == name) {
                    Some(index) => index,
                    None => {
                        fields.push((name.clone(), None));
                        fields.len() - 1
                    }
                };
                if let Some(kind) = value.kind() {
                    let merged = match fields[index].1 {
                        Some(current) => current.merge(kind),
                        None => kind,
                    };
                    fields[index].1 = Some(merged);
                }
            }
        }
        LayerSchema {
            fields: fields
                .into_iter()
                .map(|(name, kind)| (name, kind.unwrap_or(FieldKind::Text)))
                .collect(),
        }
    }

    /// Field names as written. Shapefile (dBase) names are cut to 10 bytes and
    /// made unique, the other formats keep the GML names.
    pub fn output_names(&self, format: OutputFormat) -> Vec<String> {
        if format != OutputFormat::Shapefile {
            return self.fields.iter().map(|(name, _)| name.clone()).collect();
        }
        let mut names: Vec<String> = Vec::with_capacity(self.fields.len());
        for (name, _) in &self.fields {
            let base = truncate_bytes(name, 10);
            let mut candidate = base.to_string();
            let mut counter = 1;
            while names.iter().any(|n| n.eq_ignore_ascii_case(&candidate)) {
                let suffix = format!("_{}", counter);
                candidate = format!("{}{}", truncate_bytes(name, 10 - suffix.len()), suffix);
                counter += 1;
            }
            names.push(candidate);
        }
        names
    }
}

fn truncate_bytes(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Point, line or polygon: decides the geometry type of an output layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFamily {
    Point,
    Line,
    Polygon,
}

impl GeometryFamily {
    pub const ALL: [GeometryFamily; 3] = [
        GeometryFamily::Point,
        GeometryFamily::Line,
        GeometryFamily::Polygon,
    ];

    /// Layer name suffix used when a mixed layer is split per family
    pub fn suffix(self) -> &'static str {
        match self {
            GeometryFamily::Point => "punt",
            GeometryFamily::Line => "lijn",
            GeometryFamily::Polygon => "vlak",
        }
    }

    pub fn of(geometry: &Geometry<f64>) -> Option<Self> {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(GeometryFamily::Point),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(GeometryFamily::Line)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(GeometryFamily::Polygon),
            Geometry::GeometryCollection(gc) => gc.iter().find_map(GeometryFamily::of),
        }
    }

    /// Keep the parts of `geometry` that belong to this family.
    /// Lines and polygons come out as Multi geometries; a single point stays a Point.
    /// `None` when nothing of this family is left.
    pub fn normalize(self, geometry: Geometry<f64>) -> Option<Geometry<f64>> {
        let mut points: Vec<Point<f64>> = Vec::new();
        let mut lines: Vec<LineString<f64>> = Vec::new();
        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        collect_parts(geometry, &mut points, &mut lines, &mut polygons);

        match self {
            GeometryFamily::Point => match points.len() {
                0 => None,
                1 => points.pop().map(Geometry::Point),
                _ => Some(Geometry::MultiPoint(MultiPoint::new(points))),
            },
            GeometryFamily::Line if !lines.is_empty() => {
                Some(Geometry::MultiLineString(MultiLineString::new(lines)))
            }
            GeometryFamily::Polygon if !polygons.is_empty() => {
                Some(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
            _ => None,
        }
    }
}

fn collect_parts(
    geometry: Geometry<f64>,
    points: &mut Vec<Point<f64>>,
    lines: &mut Vec<LineString<f64>>,
    polygons: &mut Vec<Polygon<f64>>,
) {
    match geometry {
        Geometry::Point(p) => points.push(p),
        Geometry::MultiPoint(mp) => points.extend(mp.0),
        Geometry::Line(l) => lines.push(LineString::from(l)),
        Geometry::LineString(ls) => lines.push(ls),
        Geometry::MultiLineString(mls) => lines.extend(mls.0),
        Geometry::Polygon(p) => polygons.push(p),
        Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
        Geometry::Rect(r) => polygons.push(r.to_polygon()),
        Geometry::Triangle(t) => polygons.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for part in gc.0 {
                collect_parts(part, points, lines, polygons);
            }
        }
    }
}

/// One BGT object: geometry (RD New) plus its GML attributes
#[derive(Debug, Clone, PartialEq)]
pub struct BgtFeature {
    pub fid: Option<u64>,
    pub geometry: Geometry<f64>,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl BgtFeature {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }
}

/// A BGT feature type held in memory
#[derive(Debug, Clone)]
pub struct BgtLayer {
    /// Feature type, e.g. `pand`
    pub name: String,
    pub epsg: i32,
    pub family: Option<GeometryFamily>,
    pub features: Vec<BgtFeature>,
}

impl BgtLayer {
    /// `family` is set when every feature has the same geometry family,
    /// `None` for an empty or mixed layer.
    pub fn new(name: &str, features: Vec<BgtFeature>) -> Self {
        let mut families = features
            .iter()
            .filter_map(|f| GeometryFamily::of(&f.geometry));
        let family = match families.next() {
            Some(first) if families.all(|f| f == first) => Some(first),
            _ => None,
        };
        BgtLayer {
            name: name.to_string(),
            epsg: BGT_EPSG,
            family,
            features,
        }
    }

    /// Read a `bgt_<layer>.gml` file. Features without a usable geometry are skipped.
    pub fn from_gml(path: &Path, name: &str, linearizer: &Linearizer) -> Result<Self> {
        let dataset =
            Dataset::open(path).with_context(|| format!("Failed to load layer: {:?}", path))?;

        let mut features = Vec::new();
        let mut skipped = 0usize;
        for mut layer in dataset.layers() {
            for feature in layer.features() {
                let geometry = match feature.geometry() {
                    Some(geometry) if !geometry.is_empty() => geometry,
                    _ => {
                        skipped += 1;
                        continue;
                    }
                };
                let geometry = match linearizer.to_geo(geometry) {
                    Ok(geometry) => geometry,
                    Err(e) => {
                        warn!("{}: skipping feature {:?}: {}", name, feature.fid(), e);
                        skipped += 1;
                        continue;
                    }
                };
                let attributes = feature
                    .fields()
                    .map(|(field, value)| {
                        (field, value.map(AttributeValue::from).unwrap_or(AttributeValue::Null))
                    })
                    .collect();
                features.push(BgtFeature {
                    fid: feature.fid(),
                    geometry,
                    attributes,
                });
            }
        }

        if skipped > 0 {
            debug!("{}: {} features without geometry skipped", name, skipped);
        }
        let layer = BgtLayer::new(name, features);
        info!(
            "Layer {} loaded: {} features, geometry {:?}",
            name,
            layer.len(),
            layer.family
        );
        Ok(layer)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features of more than one geometry family, e.g. a BGT object type
    /// that mixes points and polygons
    pub fn is_mixed(&self) -> bool {
        let mut families = self
            .features
            .iter()
            .filter_map(|f| GeometryFamily::of(&f.geometry));
        match families.next() {
            Some(first) => families.any(|f| f != first),
            None => false,
        }
    }

    /// One layer per geometry family, named `<layer>_punt`, `<layer>_lijn`
    /// and `<layer>_vlak`. A single-family layer comes back unchanged.
    pub fn split_by_family(&self) -> Vec<BgtLayer> {
        if !self.is_mixed() {
            return vec![self.clone()];
        }
        GeometryFamily::ALL
            .iter()
            .filter_map(|family| {
                let features: Vec<BgtFeature> = self
                    .features
                    .iter()
                    .filter(|f| GeometryFamily::of(&f.geometry) == Some(*family))
                    .cloned()
                    .collect();
                if features.is_empty() {
                    return None;
                }
                let mut layer =
                    BgtLayer::new(&format!("{}_{}", self.name, family.suffix()), features);
                layer.epsg = self.epsg;
                Some(layer)
            })
            .collect()
    }

    pub fn schema(&self) -> LayerSchema {
        LayerSchema::from_features(&self.features)
    }

    fn ogr_geometry_type(&self) -> OGRwkbGeometryType::Type {
        match self.family {
            Some(GeometryFamily::Point) => {
                if self
                    .features
                    .iter()
                    .any(|f| matches!(f.geometry, Geometry::MultiPoint(_)))
                {
                    OGRwkbGeometryType::wkbMultiPoint
                } else {
                    OGRwkbGeometryType::wkbPoint
                }
            }
            Some(GeometryFamily::Line) => OGRwkbGeometryType::wkbMultiLineString,
            Some(GeometryFamily::Polygon) => OGRwkbGeometryType::wkbMultiPolygon,
            None => OGRwkbGeometryType::wkbUnknown,
        }
    }

    /// Geometry as written; single points are promoted when the layer is MultiPoint
    fn output_geometry(&self, geometry: &Geometry<f64>, layer_type: OGRwkbGeometryType::Type) -> Geometry<f64> {
        match geometry {
            Geometry::Point(p) if layer_type == OGRwkbGeometryType::wkbMultiPoint => {
                Geometry::MultiPoint(MultiPoint::new(vec![*p]))
            }
            other => other.clone(),
        }
    }

    /// Write the layer with a GDAL vector driver, CRS EPSG:28992
    pub fn write(&self, path: &Path, format: OutputFormat) -> Result<()> {
        if let Some(existing) = format.dataset_files(path).into_iter().find(|f| f.exists()) {
            return Err(BgtError::WriteError {
                path: path.to_path_buf(),
                message: format!("{} already exists", existing.display()),
            }
            .into());
        }
        if format == OutputFormat::Shapefile && self.is_mixed() {
            return Err(BgtError::WriteError {
                path: path.to_path_buf(),
                message: format!(
                    "layer {} mixes geometry types, which a shapefile cannot hold",
                    self.name
                ),
            }
            .into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let driver = DriverManager::get_driver_by_name(format.driver_name())
            .with_context(|| format!("{} driver not available", format.driver_name()))?;
        let mut dataset = driver
            .create_vector_only(path)
            .with_context(|| format!("Failed to create {:?}", path))?;

        let srs = SpatialRef::from_epsg(self.epsg as u32)
            .with_context(|| format!("Failed to create EPSG:{} spatial reference", self.epsg))?;
        let layer_type = self.ogr_geometry_type();
        let mut layer = dataset
            .create_layer(LayerOptions {
                name: &self.name,
                srs: Some(&srs),
                ty: layer_type,
                options: None,
            })
            .context("Failed to create layer")?;

        let schema = self.schema();
        let names = schema.output_names(format);
        let field_defs: Vec<(&str, OGRFieldType::Type)> = names
            .iter()
            .zip(&schema.fields)
            .map(|(name, (_, kind))| (name.as_str(), kind.ogr_type()))
            .collect();
        layer
            .create_defn_fields(&field_defs)
            .context("Failed to create fields")?;

        for feature in &self.features {
            let mut field_names: Vec<&str> = Vec::with_capacity(names.len());
            let mut values: Vec<FieldValue> = Vec::with_capacity(names.len());
            for (name, (source, kind)) in names.iter().zip(&schema.fields) {
                let value = feature
                    .attribute(source)
                    .and_then(|value| value.to_field_value(*kind));
                if let Some(value) = value {
                    field_names.push(name.as_str());
                    values.push(value);
                }
            }

            let geometry = self
                .output_geometry(&feature.geometry, layer_type)
                .to_gdal()
                .context("Failed to convert geometry to GDAL")?;
            layer
                .create_feature_fields(geometry, &field_names, &values)
                .with_context(|| format!("Failed to write feature {:?}", feature.fid))?;
        }

        info!(
            "Layer {} written to {:?} ({} features)",
            self.name,
            path,
            self.len()
        );
        Ok(())
    }
}
