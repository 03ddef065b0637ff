pub mod bgt_app;
pub mod cli_bbox;

pub use bgt_app::{BgtApp, BgtOperation, DownloadArgs};
