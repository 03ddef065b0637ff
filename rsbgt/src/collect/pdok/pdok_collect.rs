use anyhow::{Context, Result};
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use url::Url;

use crate::config::BgtConfig;
use crate::error::BgtError;

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Archive format delivered by the BGT download API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    /// Flat GML, one `bgt_<layer>.gml` per feature type
    #[default]
    GmlLight,
    CityGml,
}

/// Body of the POST that creates a download request
#[derive(Debug, Serialize)]
pub struct DownloadRequest<'a> {
    pub featuretypes: &'a [String],
    pub format: DownloadFormat,
    /// Area filter as WKT in RD New
    pub geofilter: &'a str,
}

#[derive(Debug, Deserialize)]
struct DownloadRequestCreated {
    #[serde(rename = "downloadRequestId")]
    download_request_id: String,
}

#[derive(Debug, Deserialize)]
struct DownloadStatus {
    status: Option<String>,
    progress: Option<f64>,
    #[serde(rename = "_links")]
    links: Option<StatusLinks>,
}

#[derive(Debug, Deserialize)]
struct StatusLinks {
    download: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

/// Outcome of a single status check
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    /// HTTP 200: the archive is still being prepared
    Pending {
        status: Option<String>,
        progress: Option<f64>,
    },
    /// HTTP 201: the archive can be fetched from `download_href`
    Ready { download_href: String },
}

/// Interpret the answer of `GET <api>/<id>/status`.
/// 200 keeps polling, 201 means ready, anything else is an error.
pub fn interpret_status(id: &str, status: u16, body: &str) -> Result<PollState> {
    match status {
        200 => {
            let parsed: Option<DownloadStatus> = serde_json::from_str(body).ok();
            Ok(PollState::Pending {
                status: parsed.as_ref().and_then(|s| s.status.clone()),
                progress: parsed.as_ref().and_then(|s| s.progress),
            })
        }
        201 => {
            let parsed: DownloadStatus = serde_json::from_str(body)
                .with_context(|| format!("Failed to parse status of download request {}", id))?;
            let href = parsed
                .links
                .and_then(|links| links.download)
                .map(|link| link.href)
                .filter(|href| !href.is_empty())
                .ok_or_else(|| BgtError::MissingDownloadLink(id.to_string()))?;
            Ok(PollState::Ready {
                download_href: href,
            })
        }
        _ => Err(BgtError::StatusCheckFailed {
            id: id.to_string(),
            status,
            body: body.to_string(),
        }
        .into()),
    }
}

/// Call `check` every `interval` until it reports the archive ready and return
/// the download link. Errors from `check` end the loop. With a `timeout`, gives
/// up with [`BgtError::PollTimeout`] once that much time has passed.
pub fn poll_until_ready<F>(
    download_request_id: &str,
    interval: Duration,
    timeout: Option<Duration>,
    mut check: F,
) -> Result<String>
where
    F: FnMut() -> Result<PollState>,
{
    let start = Instant::now();

    #[cfg(feature = "indicatif")]
    let pb = {
        let pb = ProgressBar::new(100);
        pb.set_style(progress_style());
        pb.set_message(format!("Download request {}", download_request_id));
        pb
    };

    loop {
        match check()? {
            PollState::Ready { download_href } => {
                #[cfg(feature = "indicatif")]
                pb.finish_with_message("Archive ready");
                info!(
                    "Download request {} ready after {:.0?}",
                    download_request_id,
                    start.elapsed()
                );
                return Ok(download_href);
            }
            PollState::Pending { status, progress } => {
                #[cfg(feature = "indicatif")]
                if let Some(progress) = progress {
                    pb.set_position(progress.clamp(0.0, 100.0) as u64);
                }
                debug!(
                    "Download request {}: status {}, progress {}",
                    download_request_id,
                    status.as_deref().unwrap_or("unknown"),
                    progress.map(|p| format!("{:.0}%", p)).unwrap_or_default()
                );
            }
        }

        if let Some(timeout) = timeout {
            let waited = start.elapsed();
            if waited >= timeout {
                #[cfg(feature = "indicatif")]
                pb.abandon_with_message("Timed out");
                return Err(BgtError::PollTimeout {
                    id: download_request_id.to_string(),
                    waited,
                }
                .into());
            }
        }

        std::thread::sleep(interval);
    }
}

const USER_AGENT: &str = concat!("rsbgt/", env!("CARGO_PKG_VERSION"));

/// Client for the PDOK BGT download API
/// Submits a download request, polls it until the archive is ready and fetches the zip
pub struct PdokCollect {
    /// Submit and status calls, bounded by the request timeout
    client: Client,
    /// Archive download; archives of large areas take longer than any API call
    download_client: Client,
    base_url: Url,
    format: DownloadFormat,
    poll_interval: Duration,
    poll_timeout: Option<Duration>,
    /// Id of the last submitted download request
    pub download_request_id: Option<String>,
}

impl PdokCollect {
    pub fn new(config: &BgtConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid PDOK API url: {}", config.api_url))?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        let download_client = Client::builder()
            .connect_timeout(config.request_timeout())
            .timeout(config.download_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP download client")?;

        Ok(PdokCollect {
            client,
            download_client,
            base_url,
            format: config.format,
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            download_request_id: None,
        })
    }

    pub fn request_payload<'a>(
        &self,
        featuretypes: &'a [String],
        geofilter: &'a str,
    ) -> DownloadRequest<'a> {
        DownloadRequest {
            featuretypes,
            format: self.format,
            geofilter,
        }
    }

    pub fn status_url(&self, download_request_id: &str) -> Result<Url> {
        let url = format!(
            "{}/{}/status",
            self.base_url.as_str().trim_end_matches('/'),
            download_request_id
        );
        Url::parse(&url).with_context(|| format!("Invalid status url: {}", url))
    }

    /// Download links are host-relative (`/lv/bgt/download/...`)
    pub fn download_url(&self, download_href: &str) -> Result<Url> {
        self.base_url
            .join(download_href)
            .with_context(|| format!("Invalid download link: {}", download_href))
    }

    /// Create a download request. Returns its id (HTTP 202).
    pub fn submit(&mut self, featuretypes: &[String], geofilter: &str) -> Result<String> {
        let payload = self.request_payload(featuretypes, geofilter);
        debug!(
            "Payload: {}",
            serde_json::to_string(&payload).unwrap_or_default()
        );

        let response = self
            .client
            .post(self.base_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .context("Failed to send download request to PDOK API")?;

        if response.status() != StatusCode::ACCEPTED {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(BgtError::RequestRejected { status, body }.into());
        }

        let created: DownloadRequestCreated = response
            .json()
            .context("Failed to parse download request response from PDOK API")?;

        info!("Download request id: {}", created.download_request_id);
        self.download_request_id = Some(created.download_request_id.clone());
        Ok(created.download_request_id)
    }

    pub fn check_status(&self, download_request_id: &str) -> Result<PollState> {
        let url = self.status_url(download_request_id)?;
        let response = self
            .client
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .context("Failed to check download request status")?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .context("Failed to read status response body")?;
        interpret_status(download_request_id, status, &body)
    }

    /// Poll at a fixed interval until the archive is ready; returns the download link
    pub fn wait_until_ready(&self, download_request_id: &str) -> Result<String> {
        poll_until_ready(
            download_request_id,
            self.poll_interval,
            self.poll_timeout,
            || self.check_status(download_request_id),
        )
    }

    /// Fetch the archive and store it as `geodata_<id>.zip` in `dest_dir`
    pub fn download(
        &self,
        download_href: &str,
        dest_dir: &Path,
        download_request_id: &str,
    ) -> Result<PathBuf> {
        let url = self.download_url(download_href)?;
        info!("Downloading {}", url);

        let mut response = self
            .download_client
            .get(url.clone())
            .send()
            .with_context(|| format!("Failed to download {}", url))?;

        if response.status() != StatusCode::OK {
            return Err(BgtError::DownloadFailed {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }

        create_dir_all(dest_dir)
            .with_context(|| format!("Failed to create directory: {:?}", dest_dir))?;
        let output_path = dest_dir.join(format!("geodata_{}.zip", download_request_id));
        let mut file = File::create(&output_path)
            .with_context(|| format!("Failed to create file: {:?}", output_path))?;
        let size = response
            .copy_to(&mut file)
            .with_context(|| format!("Failed to read response body from {}", url))?;

        info!("Data saved to {:?} ({} bytes)", output_path, size);
        Ok(output_path)
    }

    /// Submit, wait and download in one go; returns the path of the zip archive
    pub fn execute(
        &mut self,
        featuretypes: &[String],
        geofilter: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let id = self.submit(featuretypes, geofilter)?;
        let download_href = self.wait_until_ready(&id)?;
        self.download(&download_href, dest_dir, &id)
    }
}
