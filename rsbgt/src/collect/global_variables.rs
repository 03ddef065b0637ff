use anyhow::Result;
use std::path::PathBuf;

use crate::error::BgtError;

pub const TEMP_PATH: &str = "./temp";

/// Custom (area based) full download endpoint of the BGT download API
pub const PDOK_BGT_CUSTOM_URL: &str = "https://api.pdok.nl/lv/bgt/download/v1_0/full/custom";

/// CRS of the geofilter accepted by the download API (RD New)
pub const PDOK_API_EPSG: i32 = 28992;

/// CRS of the delivered GML and of every written layer (RD New)
pub const BGT_EPSG: i32 = 28992;

pub const DEFAULT_BUFFER_DISTANCE: f64 = 200.0;
pub const DEFAULT_BUFFER_SEGMENTS: i32 = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Feature types offered by the BGT download API
pub const BGT_LAYERS: [&str; 36] = [
    "bak",
    "begroeidterreindeel",
    "bord",
    "buurt",
    "functioneelgebied",
    "gebouwinstallatie",
    "installatie",
    "kast",
    "kunstwerkdeel",
    "mast",
    "onbegroeidterreindeel",
    "ondersteunendwaterdeel",
    "ondersteunendwegdeel",
    "ongeclassificeerdobject",
    "openbareruimte",
    "openbareruimtelabel",
    "overbruggingsdeel",
    "overigbouwwerk",
    "overigescheiding",
    "paal",
    "pand",
    "plaatsbepalingspunt",
    "put",
    "scheiding",
    "sensor",
    "spoor",
    "stadsdeel",
    "straatmeubilair",
    "tunneldeel",
    "vegetatieobject",
    "waterdeel",
    "waterinrichtingselement",
    "waterschap",
    "wegdeel",
    "weginrichtingselement",
    "wijk",
];

pub fn get_temp_path() -> PathBuf {
    PathBuf::from(TEMP_PATH)
}

pub fn is_bgt_layer(name: &str) -> bool {
    BGT_LAYERS.contains(&name)
}

/// Validate a layer selection.
/// Names are trimmed and lowercased, duplicates dropped (first one wins).
pub fn resolve_layers<S: AsRef<str>>(requested: &[S]) -> Result<Vec<String>> {
    let mut layers: Vec<String> = Vec::with_capacity(requested.len());
    for name in requested {
        let name = name.as_ref().trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        if !is_bgt_layer(&name) {
            return Err(BgtError::UnknownLayer(name).into());
        }
        if !layers.contains(&name) {
            layers.push(name);
        }
    }
    if layers.is_empty() {
        return Err(BgtError::NoLayersSelected.into());
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue() {
        assert_eq!(BGT_LAYERS.len(), 36);
        assert!(is_bgt_layer("pand"));
        assert!(is_bgt_layer("wegdeel"));
        assert!(!is_bgt_layer("batiment"));
    }

    #[test]
    fn test_resolve_layers_dedup() {
        let layers = resolve_layers(&["Pand", " wegdeel", "pand", ""]).unwrap();
        assert_eq!(layers, vec!["pand".to_string(), "wegdeel".to_string()]);
    }

    #[test]
    fn test_resolve_layers_unknown() {
        let err = resolve_layers(&["pand", "road"]).unwrap_err();
        match err.downcast_ref::<BgtError>() {
            Some(BgtError::UnknownLayer(name)) => assert_eq!(name, "road"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_layers_empty() {
        let empty: [&str; 0] = [];
        let err = resolve_layers(&empty).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BgtError>(),
            Some(BgtError::NoLayersSelected)
        ));
    }
}
