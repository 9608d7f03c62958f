//! Installing the simple-jdbc server distribution.
//!
//! The server ships as a versioned tar archive on Maven Central. It is
//! downloaded once into a local `bin` directory and extracted there; later
//! runs find the extracted directory and skip the download.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use futures::StreamExt;

use crate::error::DownloadError;

/// Server version installed unless configured otherwise.
pub const DEFAULT_SERVER_VERSION: &str = "0.1.0";

/// Repository path holding one directory per server version.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str =
    "https://repo1.maven.org/maven2/org/askchapter/simplejdbc/simple-jdbc-server";

/// Upper bound on the archive size.
const MAX_ARCHIVE_SIZE: u64 = 512 * 1024 * 1024;

const ARTIFACT_NAME: &str = "simple-jdbc-server";

/// A server version and where it is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDistribution {
    pub version: String,
    /// Directory the archive is extracted into.
    pub bin_dir: PathBuf,
    /// Repository base URL, without the version segment.
    pub base_url: String,
}

impl ServerDistribution {
    pub fn new(version: impl Into<String>, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            bin_dir: bin_dir.into(),
            base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn dir_name(&self) -> String {
        format!("{}-{}", ARTIFACT_NAME, self.version)
    }

    /// `{base}/{version}/simple-jdbc-server-{version}.tar`
    pub fn archive_url(&self) -> String {
        format!(
            "{}/{}/{}.tar",
            self.base_url.trim_end_matches('/'),
            self.version,
            self.dir_name()
        )
    }

    /// Directory the archive extracts to.
    pub fn expected_dir(&self) -> PathBuf {
        self.bin_dir.join(self.dir_name())
    }

    /// The server startup script inside the extracted distribution.
    pub fn startup_script(&self) -> PathBuf {
        let script = if cfg!(windows) {
            format!("{}.bat", ARTIFACT_NAME)
        } else {
            ARTIFACT_NAME.to_string()
        };
        self.expected_dir().join("bin").join(script)
    }

    pub fn is_installed(&self) -> bool {
        self.expected_dir().exists()
    }

    /// Download and extract the distribution unless it is already present.
    ///
    /// Returns the startup script path. The archive is downloaded and
    /// extracted inside `bin_dir` under temporary names and moved into place
    /// only when complete, so a failure leaves nothing behind.
    pub async fn ensure_installed(&self) -> Result<PathBuf, DownloadError> {
        if self.is_installed() {
            tracing::debug!(
                "Server distribution {} already installed at {}",
                self.version,
                self.expected_dir().display()
            );
            return Ok(self.startup_script());
        }

        let url = self.archive_url();
        tracing::info!("Downloading server distribution from {}", url);

        tokio::fs::create_dir_all(&self.bin_dir)
            .await
            .map_err(|e| failed(&url, format!("failed to create {}: {}", self.bin_dir.display(), e)))?;

        let archive = download_archive(&url, &self.bin_dir).await?;

        let bin_dir = self.bin_dir.clone();
        let dir_name = self.dir_name();
        let task_url = url.clone();
        tokio::task::spawn_blocking(move || install_archive(archive, &bin_dir, &dir_name, &task_url))
            .await
            .map_err(|e| failed(&url, format!("extraction task failed: {}", e)))??;

        tracing::info!(
            "Installed server distribution {} to {}",
            self.version,
            self.expected_dir().display()
        );
        Ok(self.startup_script())
    }
}

fn failed(url: &str, reason: impl Into<String>) -> DownloadError {
    DownloadError::Failed {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn download_failure_reason(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else if error.is_request() {
        "request failed".to_string()
    } else {
        "network error".to_string()
    }
}

/// Stream the archive into a temporary file under `dir`.
async fn download_archive(url: &str, dir: &Path) -> Result<tempfile::NamedTempFile, DownloadError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| failed(url, download_failure_reason(&e)))?;

    let response = response.error_for_status().map_err(|e| {
        failed(
            url,
            format!(
                "http status {}",
                e.status()
                    .map_or("unknown".to_string(), |status| status.as_u16().to_string())
            ),
        )
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(dir)
        .map_err(|e| failed(url, format!("failed to create download file: {}", e)))?;

    let mut received: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk =
            chunk.map_err(|e| failed(url, format!("failed to read response body: {}", e)))?;
        received += chunk.len() as u64;
        if received > MAX_ARCHIVE_SIZE {
            return Err(failed(
                url,
                format!("archive larger than {} bytes", MAX_ARCHIVE_SIZE),
            ));
        }
        file.write_all(&chunk)
            .map_err(|e| failed(url, format!("failed to write download: {}", e)))?;
    }
    file.flush()
        .map_err(|e| failed(url, format!("failed to write download: {}", e)))?;

    tracing::debug!("Downloaded {} bytes from {}", received, url);
    Ok(file)
}

/// Extract `archive` into a staging directory beside `bin_dir/dir_name` and
/// move the distribution into place.
fn install_archive(
    archive: tempfile::NamedTempFile,
    bin_dir: &Path,
    dir_name: &str,
    url: &str,
) -> Result<(), DownloadError> {
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(bin_dir)
        .map_err(|e| failed(url, format!("failed to create staging directory: {}", e)))?;

    let bytes = std::fs::read(archive.path())
        .map_err(|e| failed(url, format!("failed to read download: {}", e)))?;
    extract(&bytes, staging.path(), url)?;

    let extracted = staging.path().join(dir_name);
    if !extracted.is_dir() {
        return Err(failed(
            url,
            format!("archive does not contain '{}'", dir_name),
        ));
    }

    let target = bin_dir.join(dir_name);
    match std::fs::rename(&extracted, &target) {
        Ok(()) => Ok(()),
        // Another installer finished first.
        Err(_) if target.is_dir() => Ok(()),
        Err(e) => Err(failed(
            url,
            format!("failed to move distribution into {}: {}", target.display(), e),
        )),
    }
}

/// Check if bytes start with gzip magic number (0x1f 0x8b).
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Unpack a tar archive, optionally gzip-compressed, into `dest`.
fn extract(bytes: &[u8], dest: &Path, url: &str) -> Result<(), DownloadError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let reader: Box<dyn std::io::Read + '_> = if is_gzip(bytes) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(false);
    #[cfg(any(unix, target_os = "redox"))]
    archive.set_unpack_xattrs(false);

    // `unpack` refuses entries that would land outside `dest`.
    archive
        .unpack(dest)
        .map_err(|e| failed(url, format!("failed to extract archive: {}", e)))
}
