use anyhow::{Context, Result};
use log::warn;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Extract every entry of `zip_path` below `dest_dir`.
/// Returns the extracted files in archive order. Entries whose path would
/// leave `dest_dir` are skipped.
pub fn extract_archive(zip_path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("Failed to open archive {:?}", zip_path))?;
    let mut archive = ZipArchive::new(io::BufReader::new(file))
        .with_context(|| format!("Failed to read zip archive {:?}", zip_path))?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {:?}", dest_dir))?;

    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .with_context(|| format!("Failed to read entry {} of {:?}", i, zip_path))?;

        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                warn!("Skipping archive entry with unsafe path: {}", entry.name());
                continue;
            }
        };
        let outpath = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath)
                .with_context(|| format!("Failed to create directory: {:?}", outpath))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let mut outfile = fs::File::create(&outpath)
            .with_context(|| format!("Failed to create file: {:?}", outpath))?;
        io::copy(&mut entry, &mut outfile)
            .with_context(|| format!("Failed to extract {:?}", outpath))?;
        extracted.push(outpath);
    }

    Ok(extracted)
}

/// Layer name of a `bgt_<layer>.gml` file, `None` for anything else
pub fn bgt_layer_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.len() <= 4 || !file_name.to_lowercase().ends_with(".gml") {
        return None;
    }
    let stem = file_name.get(..file_name.len() - 4)?;
    let layer = stem.strip_prefix("bgt_")?;
    if layer.is_empty() {
        return None;
    }
    Some(layer.to_string())
}
