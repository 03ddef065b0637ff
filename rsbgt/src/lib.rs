//! Download BGT (Basisregistratie Grootschalige Topografie) layers from the
//! PDOK download API and clip them to an area of interest.
//!
//! ```no_run
//! use rsbgt::config::BgtConfig;
//! use rsbgt::geometric::bgt::Bgt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut bgt = Bgt::new(Some("./output".to_string()), BgtConfig::default())?;
//! bgt.set_bbox(155000.0, 463000.0, 155500.0, 463500.0, 28992);
//! bgt.set_layers(&["pand", "wegdeel"]);
//! let bgt = bgt.run()?;
//! let written = bgt.to_files(bgt.config().output_format)?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod collect;
pub mod commons;
pub mod config;
pub mod error;
pub mod geo_core;
pub mod geometric;

pub use error::BgtError;
