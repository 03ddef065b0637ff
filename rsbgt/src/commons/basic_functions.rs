use chrono::{DateTime, Local};
use std::path::Path;

/// Local time as `YYYYmmdd_HHMMSS`, used in output and work directory names
pub fn timestamp() -> String {
    format_timestamp(&Local::now())
}

pub fn format_timestamp(datetime: &DateTime<Local>) -> String {
    datetime.format("%Y%m%d_%H%M%S").to_string()
}

/// `clipped_bgt_<layer>_<timestamp>`
pub fn clipped_file_stem(layer: &str, timestamp: &str) -> String {
    format!("clipped_bgt_{}_{}", layer, timestamp)
}

/// First of `stem`, `stem_1`, `stem_2`, ... for which no `<dir>/<stem>.<ext>`
/// exists for any of `extensions`
pub fn available_stem(dir: &Path, stem: &str, extensions: &[&str]) -> String {
    let taken = |candidate: &str| {
        extensions
            .iter()
            .any(|ext| dir.join(format!("{}.{}", candidate, ext)).exists())
    };
    if !taken(stem) {
        return stem.to_string();
    }
    (1..)
        .map(|n| format!("{}_{}", stem, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| stem.to_string())
}
