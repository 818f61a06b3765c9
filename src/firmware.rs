//! Locate, download and load firmware images
//!
//! Firmware is published as an asset of the latest GitHub release of a
//! project. The release metadata is resolved through the GitHub REST API and
//! the asset is then streamed, reporting progress as each chunk arrives.
//! Alternatively a firmware image can be loaded from a local `.bin` file.

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use log::debug;
use reqwest::{blocking::Client, header::ACCEPT};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::Error, progress::ProgressSink};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_OWNER: &str = "MacheteHot";
const DEFAULT_REPO: &str = "c3Homekit";

/// Size of the buffer each chunk of a download is read into
const CHUNK_SIZE: usize = 16 * 1024;
/// Upper bound of the buffer reserved up front from a declared length
const MAX_PREALLOC: u64 = 16 * 1024 * 1024;

/// The project whose releases carry the firmware
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ReleaseSource {
    /// Base URL of the GitHub REST API
    pub api_url: String,
    /// Owner of the repository
    pub owner: String,
    /// Name of the repository
    pub repo: String,
    /// Name of the release asset to use, the first asset when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

impl Default for ReleaseSource {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            owner: DEFAULT_OWNER.into(),
            repo: DEFAULT_REPO.into(),
            asset: None,
        }
    }
}

impl ReleaseSource {
    /// Endpoint describing the latest release
    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }
}

/// Release metadata, as returned by the GitHub REST API
#[derive(Debug, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// A downloadable file attached to a release
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Asset {
    #[serde(default)]
    pub name: Option<String>,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Release {
    /// The asset named `name`, or the first listed asset
    pub fn firmware_asset(&self, name: Option<&str>) -> Result<&Asset, Error> {
        let asset = match name {
            Some(name) => self
                .assets
                .iter()
                .find(|asset| asset.name.as_deref() == Some(name)),
            None => self.assets.first(),
        };

        asset.ok_or(Error::NoFirmwareAsset)
    }
}

impl Asset {
    /// File name to save the asset as
    pub fn file_name(&self) -> String {
        self.name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| {
                self.browser_download_url
                    .rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "firmware.bin".into())
    }
}

/// HTTP client used for all requests; GitHub rejects requests without a
/// user agent
pub fn http_client() -> Result<Client, Error> {
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()
        .map_err(|err| Error::MetadataFetch(err.to_string()))
}

/// Fetch the metadata of the latest release
pub fn latest_release(client: &Client, source: &ReleaseSource) -> Result<Release, Error> {
    let url = source.latest_release_url();
    debug!("Fetching release metadata from {url}");

    client
        .get(&url)
        .header(ACCEPT, "application/vnd.github+json")
        .send()
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.json::<Release>())
        .map_err(|err| Error::MetadataFetch(err.to_string()))
}

/// Resolve the firmware asset of the latest release
pub fn resolve_latest_firmware(client: &Client, source: &ReleaseSource) -> Result<Asset, Error> {
    let release = latest_release(client, source)?;
    if let Some(tag) = &release.tag_name {
        debug!("Latest release: {tag}");
    }

    release.firmware_asset(source.asset.as_deref()).cloned()
}

/// Resolve the download URL of the latest firmware
pub fn resolve_latest_firmware_url(client: &Client, source: &ReleaseSource) -> Result<String, Error> {
    resolve_latest_firmware(client, source).map(|asset| asset.browser_download_url)
}

/// Download `url`, reporting the received byte count after every chunk
///
/// Progress is only reported when the server declares the content length.
pub fn download_with_progress(
    client: &Client,
    url: &str,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<u8>, Error> {
    debug!("Downloading firmware from {url}");

    let response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| Error::Download(err.to_string()))?;
    let total = response.content_length();

    read_with_progress(response, total, progress)
}

/// Read a response body chunk by chunk
///
/// With a declared `total` the sink receives the cumulative byte count after
/// every chunk, and the body must be exactly `total` bytes long. Without one
/// the body is read whole and the sink is never invoked.
pub fn read_with_progress<R: Read>(
    mut reader: R,
    total: Option<u64>,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<u8>, Error> {
    let Some(total) = total else {
        let mut firmware = Vec::new();
        reader.read_to_end(&mut firmware).map_err(read_error)?;

        return Ok(firmware);
    };

    let mut firmware = Vec::with_capacity(total.min(MAX_PREALLOC) as usize);
    let mut chunk = vec![0; CHUNK_SIZE];
    let mut received = 0u64;

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(read_error(err)),
        };

        firmware.extend_from_slice(&chunk[..read]);
        received += read as u64;
        progress.on_progress(received, total);
    }

    if received != total {
        return Err(Error::ContentLengthMismatch {
            expected: total,
            received,
        });
    }

    Ok(firmware)
}

fn read_error(err: io::Error) -> Error {
    Error::Download(err.to_string())
}

/// Save a downloaded firmware image
pub fn save_firmware(firmware: &[u8], path: &Path) -> Result<PathBuf, Error> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, firmware)?;

    Ok(path.to_path_buf())
}

/// Read a local firmware image in full
pub fn load_local(path: &Path) -> Result<Vec<u8>, Error> {
    let is_bin = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("bin"));
    if !is_bin {
        return Err(Error::InvalidFirmwarePath);
    }

    Ok(fs::read(path)?)
}

/// Hex encoded SHA-256 digest of a firmware image
pub fn sha256_hex(firmware: &[u8]) -> String {
    format!("{:x}", Sha256::digest(firmware))
}
