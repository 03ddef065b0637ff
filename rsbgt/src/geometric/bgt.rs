use anyhow::{Context, Result};
use log::{debug, error, info, warn};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::collect::archive::{bgt_layer_name, extract_archive};
use crate::collect::global_variables::{get_temp_path, resolve_layers, TEMP_PATH};
use crate::collect::pdok::PdokCollect;
use crate::commons::basic_functions::{available_stem, clipped_file_stem, timestamp};
use crate::config::BgtConfig;
use crate::error::BgtError;
use crate::geo_core::{BoundingBox, GeoCore};
use crate::geometric::area_of_interest::{AreaOfInterest, AreaSource};
use crate::geometric::bgt_layer::{BgtLayer, OutputFormat};
use crate::geometric::clip::{ClipMask, ClipMode, ClipSettings};
use crate::geometric::linearize::Linearizer;

/// Directory holding the downloaded archive and the extracted GML
#[derive(Debug)]
enum WorkDir {
    /// Removed together with the `Bgt`
    Temporary(TempDir),
    Persistent(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(dir) => dir.path(),
            WorkDir::Persistent(path) => path,
        }
    }
}

/// BGT download for an area of interest
///
/// Submits a PDOK download request for the selected layers, waits for the
/// archive, extracts it and clips every layer to the buffered area (or its
/// grown bounding box). The clipped layers are kept in memory and can be
/// written with [`Bgt::to_files`].
pub struct Bgt {
    pub geo_core: GeoCore,
    config: BgtConfig,
    area_source: Option<AreaSource>,
    layers: Vec<String>,
    area: Option<AreaOfInterest>,
    clip_mask: Option<ClipMask>,
    download_request_id: Option<String>,
    work_dir: Option<WorkDir>,
    clipped: BTreeMap<String, BgtLayer>,
}

impl Bgt {
    /// `output_path` is the directory the clipped layers are written to
    pub fn new(output_path: Option<String>, config: BgtConfig) -> Result<Self> {
        config.validate()?;
        let output_path = PathBuf::from(output_path.as_deref().unwrap_or(TEMP_PATH));

        Ok(Bgt {
            geo_core: GeoCore::new(output_path),
            config,
            area_source: None,
            layers: Vec::new(),
            area: None,
            clip_mask: None,
            download_request_id: None,
            work_dir: None,
            clipped: BTreeMap::new(),
        })
    }

    pub fn set_area(&mut self, source: AreaSource) {
        self.area_source = Some(source);
    }

    /// Area of interest as a rectangle in EPSG:`epsg`
    pub fn set_bbox(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64, epsg: i32) {
        self.area_source = Some(AreaSource::BoundingBox {
            bbox: BoundingBox::new(min_x, min_y, max_x, max_y),
            epsg,
        });
    }

    pub fn set_layers<S: AsRef<str>>(&mut self, layers: &[S]) {
        self.layers = layers.iter().map(|l| l.as_ref().to_string()).collect();
    }

    pub fn set_clip_mode(&mut self, mode: ClipMode) {
        self.config.clip_mode = mode;
    }

    pub fn set_buffer_distance(&mut self, distance: f64) {
        self.config.buffer_distance = distance;
    }

    pub fn config(&self) -> &BgtConfig {
        &self.config
    }

    pub fn get_output_path(&self) -> &Path {
        self.geo_core.get_output_path()
    }

    pub fn get_download_request_id(&self) -> Option<&str> {
        self.download_request_id.as_deref()
    }

    /// Area of interest in the API CRS, once prepared
    pub fn area(&self) -> Option<&AreaOfInterest> {
        self.area.as_ref()
    }

    pub fn clip_mask(&self) -> Option<&ClipMask> {
        self.clip_mask.as_ref()
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_ref().map(WorkDir::path)
    }

    /// Download, extract and clip
    pub fn run(mut self) -> Result<Self> {
        self.run_internal()?;
        Ok(self)
    }

    /// Internal run method that can be called mutably
    pub fn run_internal(&mut self) -> Result<()> {
        let result = self
            .prepare()
            .and_then(|geofilter| self.download(&geofilter))
            .and_then(|zip_path| self.process_archive(&zip_path));
        if let Err(e) = &result {
            error!("BGT download failed: {:#}", e);
        }
        result
    }

    /// Validate the layer selection, load the area of interest and build the
    /// clip mask. Returns the geofilter WKT for the API.
    pub fn prepare(&mut self) -> Result<String> {
        self.config.validate()?;
        self.layers = resolve_layers(&self.layers)?;

        let source = self.area_source.as_ref().ok_or_else(|| {
            BgtError::NoAreaOfInterest("no area of interest set".to_string())
        })?;
        // PDOK takes the geofilter in RD New, the CRS of the BGT itself
        let area = AreaOfInterest::load(source)?.to_api_crs()?;

        let mask = ClipSettings::from_config(&self.config).clip_mask(&area.geometry)?;
        let geofilter = mask.geofilter_wkt()?;
        debug!("Geofilter: {}", geofilter);

        self.geo_core.set_bbox(mask.bbox());
        self.area = Some(area);
        self.clip_mask = Some(mask);
        Ok(geofilter)
    }

    fn create_work_dir(&self) -> Result<WorkDir> {
        let persistent_root = match &self.config.work_dir {
            Some(dir) => Some(dir.clone()),
            None if self.config.keep_downloads => Some(get_temp_path()),
            None => None,
        };

        match persistent_root {
            Some(root) => {
                let path = root.join(format!("bgt_{}", timestamp()));
                fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create directory: {:?}", path))?;
                info!("Downloads kept in {:?}", path);
                Ok(WorkDir::Persistent(path))
            }
            None => {
                let dir = TempDir::new().context("Failed to create temporary directory")?;
                Ok(WorkDir::Temporary(dir))
            }
        }
    }

    fn download(&mut self, geofilter: &str) -> Result<PathBuf> {
        if self.work_dir.is_none() {
            self.work_dir = Some(self.create_work_dir()?);
        }
        let dest_dir = self
            .work_dir()
            .context("Work directory not available")?
            .to_path_buf();

        let mut pdok = PdokCollect::new(&self.config)?;
        let zip_path = pdok
            .execute(&self.layers, geofilter, &dest_dir)
            .context("Failed to download BGT data from PDOK")?;
        self.download_request_id = pdok.download_request_id.take();
        Ok(zip_path)
    }

    /// Extract a downloaded archive and clip the selected layers it holds.
    /// [`Bgt::prepare`] must have run first.
    pub fn process_archive(&mut self, zip_path: &Path) -> Result<()> {
        let mask = self
            .clip_mask
            .clone()
            .context("Clip mask not built, call prepare() first")?;

        let extract_dir = zip_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("extracted");
        let files = extract_archive(zip_path, &extract_dir)?;

        let mut selected: Vec<(String, PathBuf)> = Vec::new();
        for file in files {
            match bgt_layer_name(&file) {
                Some(name) if self.layers.contains(&name) => selected.push((name, file)),
                Some(name) => info!("Layer {} not selected, skipped", name),
                None => debug!("Skipping {:?}", file),
            }
        }
        if selected.is_empty() {
            warn!("No selected BGT layer found in {:?}", zip_path);
        }

        let linearizer = Linearizer::new(self.config.arc_step_degrees);

        #[cfg(feature = "rayon")]
        let clipped = selected
            .par_iter()
            .map(|(name, path)| load_and_clip(name, path, &linearizer, &mask))
            .collect::<Result<Vec<_>>>()?;

        #[cfg(not(feature = "rayon"))]
        let clipped = selected
            .iter()
            .map(|(name, path)| load_and_clip(name, path, &linearizer, &mask))
            .collect::<Result<Vec<_>>>()?;

        for layer in clipped {
            self.clipped.insert(layer.name.clone(), layer);
        }
        Ok(())
    }

    /// Clipped layer by name
    pub fn get_layer(&self, name: &str) -> Option<&BgtLayer> {
        self.clipped.get(name)
    }

    pub fn layers(&self) -> &BTreeMap<String, BgtLayer> {
        &self.clipped
    }

    /// Write every clipped layer to the output directory and return the
    /// path per written layer.
    ///
    /// Layers left empty by the clip are not written. A layer that mixes
    /// geometry families is written as `<layer>_punt`, `<layer>_lijn` and
    /// `<layer>_vlak` when the format is Shapefile. Existing files are never
    /// overwritten: a name already taken gets a `_1`, `_2`, ... suffix.
    pub fn to_files(&self, format: OutputFormat) -> Result<BTreeMap<String, PathBuf>> {
        let timestamp = timestamp();
        let output_dir = self.get_output_path();
        let mut written = BTreeMap::new();

        for (name, layer) in &self.clipped {
            if layer.is_empty() {
                info!("Layer {} has no features inside the area, not written", name);
                continue;
            }
            let parts: Vec<Cow<BgtLayer>> = if format == OutputFormat::Shapefile && layer.is_mixed() {
                info!("Layer {} mixes geometry types, written per type", name);
                layer.split_by_family().into_iter().map(Cow::Owned).collect()
            } else {
                vec![Cow::Borrowed(layer)]
            };

            for part in parts {
                let stem = available_stem(
                    output_dir,
                    &clipped_file_stem(&part.name, &timestamp),
                    format.file_extensions(),
                );
                let path = output_dir.join(format!("{}.{}", stem, format.extension()));
                part.write(&path, format).map_err(|e| {
                    error!("Failed to write layer {}: {:#}", part.name, e);
                    e
                })?;
                written.insert(part.name.clone(), path);
            }
        }
        Ok(written)
    }
}

fn load_and_clip(
    name: &str,
    path: &Path,
    linearizer: &Linearizer,
    mask: &ClipMask,
) -> Result<BgtLayer> {
    let layer = BgtLayer::from_gml(path, name, linearizer)?;
    let clipped = mask
        .clip_layer(&layer)
        .with_context(|| format!("Failed to clip layer {}", name))?;
    info!(
        "Layer {}: {} of {} features kept",
        name,
        clipped.len(),
        layer.len()
    );
    Ok(clipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::bgt_layer::{AttributeValue, BgtFeature, GeometryFamily};
    use geo::{line_string, polygon, Area, Geometry};
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn gml(layer: &str, features: &[(&str, &str)]) -> String {
        let mut members = String::new();
        for (id, coords) in features {
            members.push_str(&format!(
                r#"  <gml:featureMember>
    <ogr:{layer} gml:id="{id}">
      <ogr:geometryProperty><gml:Polygon srsName="EPSG:28992"><gml:outerBoundaryIs><gml:LinearRing><gml:coordinates>{coords}</gml:coordinates></gml:LinearRing></gml:outerBoundaryIs></gml:Polygon></ogr:geometryProperty>
      <ogr:identificatie>{id}</ogr:identificatie>
    </ogr:{layer}>
  </gml:featureMember>
"#
            ));
        }
        format!(
            r#"<?xml version="1.0" encoding="utf-8" ?>
<ogr:FeatureCollection xmlns:ogr="http://ogr.maptools.org/" xmlns:gml="http://www.opengis.net/gml">
{members}</ogr:FeatureCollection>
"#
        )
    }

    fn build_archive(path: &Path) {
        let file = fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let pand = gml(
            "pand",
            &[
                ("p1", "0,0 10,0 10,10 0,10 0,0"),
                ("p2", "5,5 15,5 15,15 5,15 5,5"),
                ("p3", "100,100 110,100 110,110 100,110 100,100"),
            ],
        );
        let wegdeel = gml("wegdeel", &[("w1", "0,0 1,0 1,1 0,1 0,0")]);
        for (name, content) in [
            ("bgt_pand.gml", pand.as_str()),
            ("bgt_wegdeel.gml", wegdeel.as_str()),
            ("readme.txt", "BGT"),
        ] {
            zip.start_file(name, FileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn bgt(output: &Path) -> Bgt {
        let mut bgt = Bgt::new(
            Some(output.to_string_lossy().to_string()),
            BgtConfig::default(),
        )
        .unwrap();
        bgt.set_bbox(0.0, 0.0, 10.0, 10.0, 28992);
        bgt.set_layers(&["Pand"]);
        bgt.set_clip_mode(ClipMode::BoundingBox);
        bgt.set_buffer_distance(0.0);
        bgt
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = BgtConfig {
            buffer_distance: -1.0,
            ..BgtConfig::default()
        };
        assert!(Bgt::new(None, config).is_err());
    }

    #[test]
    fn test_default_output_path() {
        let bgt = Bgt::new(None, BgtConfig::default()).unwrap();
        assert_eq!(bgt.get_output_path(), Path::new(TEMP_PATH));
        assert!(bgt.layers().is_empty());
    }

    #[test]
    fn test_prepare_requires_area() {
        let mut bgt = Bgt::new(None, BgtConfig::default()).unwrap();
        bgt.set_layers(&["pand"]);
        let err = bgt.prepare().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BgtError>(),
            Some(BgtError::NoAreaOfInterest(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_unknown_layer() {
        let mut bgt = Bgt::new(None, BgtConfig::default()).unwrap();
        bgt.set_bbox(0.0, 0.0, 10.0, 10.0, 28992);
        bgt.set_layers(&["pand", "batiment"]);
        let err = bgt.prepare().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BgtError>(),
            Some(BgtError::UnknownLayer(name)) if name == "batiment"
        ));
    }

    #[test]
    fn test_prepare_builds_mask() {
        let dir = tempfile::tempdir().unwrap();
        let mut bgt = bgt(dir.path());
        bgt.set_buffer_distance(5.0);
        let geofilter = bgt.prepare().unwrap();

        assert!(geofilter.starts_with("POLYGON"));
        assert_eq!(
            bgt.clip_mask().and_then(|m| m.bbox()),
            Some(BoundingBox::new(-5.0, -5.0, 15.0, 15.0))
        );
        assert_eq!(bgt.geo_core.get_bbox(), Some(BoundingBox::new(-5.0, -5.0, 15.0, 15.0)));
        assert_eq!(bgt.area().map(|a| a.epsg), Some(28992));
    }

    #[test]
    fn test_process_archive_requires_prepare() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("geodata_x.zip");
        build_archive(&zip_path);
        let mut bgt = bgt(dir.path());
        assert!(bgt.process_archive(&zip_path).is_err());
    }

    #[test]
    fn test_process_archive_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("download").join("geodata_x.zip");
        fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
        build_archive(&zip_path);

        let output = dir.path().join("output");
        let mut bgt = bgt(&output);
        bgt.prepare().unwrap();
        bgt.process_archive(&zip_path).unwrap();

        // wegdeel is in the archive but not selected
        assert_eq!(bgt.layers().keys().collect::<Vec<_>>(), vec!["pand"]);
        let pand = bgt.get_layer("pand").unwrap();
        assert_eq!(pand.family, Some(GeometryFamily::Polygon));
        assert_eq!(pand.len(), 2);
        assert!((pand.features[0].geometry.unsigned_area() - 100.0).abs() < 1e-9);
        assert!((pand.features[1].geometry.unsigned_area() - 25.0).abs() < 1e-9);
        assert_eq!(
            pand.features[1].attribute("identificatie"),
            Some(&AttributeValue::Text("p2".to_string()))
        );

        let written = bgt.to_files(OutputFormat::GeoJson).unwrap();
        let path = written.get("pand").unwrap();
        assert!(path.exists());
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(file_name.starts_with("clipped_bgt_pand_"), "{}", file_name);
        assert!(file_name.ends_with(".geojson"), "{}", file_name);
    }

    #[test]
    fn test_persistent_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = BgtConfig {
            work_dir: Some(dir.path().join("work")),
            ..BgtConfig::default()
        };
        let bgt = Bgt::new(None, config).unwrap();
        let work_dir = bgt.create_work_dir().unwrap();
        assert!(matches!(work_dir, WorkDir::Persistent(_)));
        assert!(work_dir.path().starts_with(dir.path().join("work")));
        assert!(work_dir.path().is_dir());

        let bgt = Bgt::new(None, BgtConfig::default()).unwrap();
        let work_dir = bgt.create_work_dir().unwrap();
        assert!(matches!(work_dir, WorkDir::Temporary(_)));
    }

    fn bgt_feature(id: u64, geometry: Geometry<f64>) -> BgtFeature {
        BgtFeature {
            fid: Some(id),
            geometry,
            attributes: vec![("gml_id".to_string(), AttributeValue::Text(format!("f{}", id)))],
        }
    }

    fn mixed_layer() -> BgtLayer {
        BgtLayer::new(
            "kunstwerkdeel",
            vec![
                bgt_feature(
                    1,
                    Geometry::Polygon(polygon![
                        (x: 0.0, y: 0.0),
                        (x: 2.0, y: 0.0),
                        (x: 2.0, y: 2.0),
                        (x: 0.0, y: 0.0),
                    ]),
                ),
                bgt_feature(
                    2,
                    Geometry::LineString(line_string![(x: 0.0, y: 5.0), (x: 5.0, y: 5.0)]),
                ),
            ],
        )
    }

    #[test]
    fn test_to_files_splits_mixed_shapefile_layer() {
        let dir = tempfile::tempdir().unwrap();
        let mut bgt = bgt(dir.path());
        bgt.clipped.insert("kunstwerkdeel".to_string(), mixed_layer());

        let written = bgt.to_files(OutputFormat::Shapefile).unwrap();
        assert_eq!(
            written.keys().collect::<Vec<_>>(),
            vec!["kunstwerkdeel_lijn", "kunstwerkdeel_vlak"]
        );
        assert!(written.values().all(|path| path.exists()));

        // other formats hold both geometry types in one layer
        let written = bgt.to_files(OutputFormat::GeoPackage).unwrap();
        assert_eq!(written.keys().collect::<Vec<_>>(), vec!["kunstwerkdeel"]);
    }

    #[test]
    fn test_to_files_twice_keeps_both_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut bgt = bgt(dir.path());
        let mut features = mixed_layer().features;
        features.truncate(1);
        bgt.clipped.insert("pand".to_string(), BgtLayer::new("pand", features));

        let first = bgt.to_files(OutputFormat::Shapefile).unwrap();
        let second = bgt.to_files(OutputFormat::Shapefile).unwrap();
        let first = first.get("pand").unwrap();
        let second = second.get("pand").unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
        assert!(second.with_extension("dbf").exists());
    }
}
