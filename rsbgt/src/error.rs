use std::path::PathBuf;
use std::time::Duration;

/// Domain failures of a BGT download run.
/// Library functions return `anyhow::Result`; these variants can be recovered
/// from the error chain with `downcast_ref::<BgtError>()`.
#[derive(thiserror::Error, Debug)]
pub enum BgtError {
    #[error("Invalid input: {0}")]
    InvalidUserInput(String),
    #[error("Unknown BGT layer '{0}'")]
    UnknownLayer(String),
    #[error("No BGT layers selected")]
    NoLayersSelected,
    #[error("No valid polygon geometry found in {0}")]
    NoAreaOfInterest(String),
    #[error("Invalid or unsupported geometry: {0}")]
    InvalidGeometry(String),
    #[error("PDOK rejected the download request ({status}): {body}")]
    RequestRejected { status: u16, body: String },
    #[error("Error checking status of download request {id} ({status}): {body}")]
    StatusCheckFailed { id: String, status: u16, body: String },
    #[error("Download request {0} is ready but has no download link")]
    MissingDownloadLink(String),
    #[error("Download request {id} not ready after {waited:?}")]
    PollTimeout { id: String, waited: Duration },
    #[error("Error downloading data from {url} ({status})")]
    DownloadFailed { url: String, status: u16 },
    #[error("Error writing to '{path}': {message}")]
    WriteError { path: PathBuf, message: String },
}
