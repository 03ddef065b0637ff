use anyhow::Result;
use rsbgt::config::BgtConfig;
use rsbgt::geometric::bgt::Bgt;
use rsbgt::geometric::bgt_layer::OutputFormat;
use rsbgt::geometric::clip::ClipMode;

/// Example: downloading BGT buildings and road parts around Utrecht Centraal
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("=== Example: Loading BGT from the PDOK download API ===\n");

    let config = BgtConfig {
        poll_timeout_secs: Some(900),
        ..BgtConfig::default()
    };
    let mut bgt = Bgt::new(Some("./output".to_string()), config)?;

    // Area of interest in WGS84, reprojected to RD New before submission
    bgt.set_bbox(5.1080, 52.0880, 5.1130, 52.0910, 4326);
    bgt.set_layers(&["pand", "wegdeel", "waterdeel"]);
    bgt.set_clip_mode(ClipMode::Buffer);
    bgt.set_buffer_distance(50.0);

    println!("Requesting layers, this can take a few minutes...");
    let bgt = bgt.run()?;

    if let Some(id) = bgt.get_download_request_id() {
        println!("  - Download request: {}", id);
    }
    for (name, layer) in bgt.layers() {
        println!(
            "  - {}: {} features ({:?})",
            name,
            layer.len(),
            layer.family
        );
    }

    println!("\nSaving to GeoPackage...");
    for (name, path) in bgt.to_files(OutputFormat::GeoPackage)? {
        println!("  - {}: {}", name, path.display());
    }

    Ok(())
}
