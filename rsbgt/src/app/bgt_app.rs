use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::app::cli_bbox::parse_bbox;
use crate::collect::global_variables::{BGT_EPSG, BGT_LAYERS};
use crate::config::BgtConfig;
use crate::geo_core::BoundingBox;
use crate::geometric::area_of_interest::AreaSource;
use crate::geometric::bgt::Bgt;
use crate::geometric::bgt_layer::OutputFormat;
use crate::geometric::clip::ClipMode;

/// Download BGT (Dutch large-scale topography) layers from PDOK and clip them to an area of interest
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct BgtApp {
    #[command(subcommand)]
    pub op: BgtOperation,
}

#[derive(Debug, Clone, Subcommand)]
pub enum BgtOperation {
    /// list the BGT layers that can be requested
    Layers,
    /// download the selected layers around an area of interest, clip and write them
    Download(DownloadArgs),
}

#[derive(Debug, Clone, Args)]
#[command(group(ArgGroup::new("area").required(true).args(["input", "wkt", "bbox"])))]
#[command(group(ArgGroup::new("selection").required(true).args(["layers", "all_layers"])))]
pub struct DownloadArgs {
    /// vector file holding the polygon of interest
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// feature id to use from the input file. if not provided, the first
    /// feature with a geometry is used.
    #[arg(long, requires = "input")]
    pub feature_index: Option<u64>,

    /// polygon of interest as WKT
    #[arg(long)]
    pub wkt: Option<String>,

    /// rectangle of interest (format: min_x,min_y,max_x,max_y)
    #[arg(short, long, value_parser = parse_bbox, allow_hyphen_values(true))]
    pub bbox: Option<BoundingBox>,

    /// EPSG code of the area of interest. defaults to the CRS of the input
    /// file, or 28992 (RD New) for --wkt and --bbox.
    #[arg(long)]
    pub epsg: Option<i32>,

    /// comma-separated BGT layers, see `rsbgt layers`
    #[arg(short, long, value_delimiter = ',')]
    pub layers: Vec<String>,

    /// request every BGT layer
    #[arg(long)]
    pub all_layers: bool,

    /// buffer around the area of interest in metres
    #[arg(long)]
    pub buffer_distance: Option<f64>,

    #[arg(long, value_enum)]
    pub clip_mode: Option<ClipMode>,

    #[arg(long, value_enum)]
    pub output_format: Option<OutputFormat>,

    /// directory the clipped layers are written to
    #[arg(short, long)]
    pub output_directory: Option<String>,

    /// TOML file with download settings; flags given here take precedence
    #[arg(short, long)]
    pub config_file: Option<PathBuf>,

    /// keep the downloaded archive and extracted GML
    #[arg(long)]
    pub keep_downloads: bool,

    /// stop waiting for the PDOK download request after this many seconds
    #[arg(long)]
    pub poll_timeout: Option<u64>,
}

impl DownloadArgs {
    /// Configuration file (or defaults) with the command line overrides applied
    pub fn config(&self) -> Result<BgtConfig> {
        let mut config = match &self.config_file {
            Some(path) => BgtConfig::from_file(path)?,
            None => BgtConfig::default(),
        };
        if let Some(distance) = self.buffer_distance {
            config.buffer_distance = distance;
        }
        if let Some(mode) = self.clip_mode {
            config.clip_mode = mode;
        }
        if let Some(format) = self.output_format {
            config.output_format = format;
        }
        if self.keep_downloads {
            config.keep_downloads = true;
        }
        if let Some(timeout) = self.poll_timeout {
            config.poll_timeout_secs = Some(timeout);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn area_source(&self) -> Option<AreaSource> {
        if let Some(path) = &self.input {
            return Some(AreaSource::Vector {
                path: path.clone(),
                feature_index: self.feature_index,
                epsg: self.epsg,
            });
        }
        if let Some(wkt) = &self.wkt {
            return Some(AreaSource::Wkt {
                wkt: wkt.clone(),
                epsg: self.epsg.unwrap_or(BGT_EPSG),
            });
        }
        self.bbox.map(|bbox| AreaSource::BoundingBox {
            bbox,
            epsg: self.epsg.unwrap_or(BGT_EPSG),
        })
    }

    pub fn selected_layers(&self) -> Vec<String> {
        if self.all_layers {
            BGT_LAYERS.iter().map(|l| l.to_string()).collect()
        } else {
            self.layers.clone()
        }
    }
}

impl BgtOperation {
    pub fn run(&self) -> Result<()> {
        match self {
            BgtOperation::Layers => {
                for layer in BGT_LAYERS {
                    println!("{}", layer);
                }
                Ok(())
            }
            BgtOperation::Download(args) => {
                let config = args.config()?;
                let format = config.output_format;

                let mut bgt = Bgt::new(args.output_directory.clone(), config)?;
                if let Some(source) = args.area_source() {
                    bgt.set_area(source);
                }
                bgt.set_layers(&args.selected_layers());

                let bgt = bgt.run()?;
                for (layer, path) in bgt.to_files(format)? {
                    println!("{}\t{}", layer, path.display());
                }
                Ok(())
            }
        }
    }
}
