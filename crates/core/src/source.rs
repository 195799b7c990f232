use std::{
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use reqwest::Url;
use tokio::{fs, io::AsyncWriteExt, process::Command};
use uuid::Uuid;

/// Hosts that need a dedicated extractor instead of a plain GET.
const STREAMING_HOSTS: &[&str] = &["youtube.com", "youtu.be", "vimeo.com"];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// yt-dlp for streaming video hosts
    Extractor,
    DirectDownload,
}

/// Decide how a URL should be fetched.
pub fn classify_url(url: &str) -> Result<FetchStrategy, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let streaming = STREAMING_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")));

    Ok(if streaming {
        FetchStrategy::Extractor
    } else {
        FetchStrategy::DirectDownload
    })
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Download `url` into a fresh file inside `dest_dir`.
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}

const DEFAULT_EXTRACTOR: &str = "yt-dlp";

pub struct HttpSourceFetcher {
    http: reqwest::Client,
    extractor: PathBuf,
}

impl Default for HttpSourceFetcher {
    fn default() -> Self {
        Self {
            http: reqwest::Client::default(),
            extractor: PathBuf::from(DEFAULT_EXTRACTOR),
        }
    }
}

impl HttpSourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another yt-dlp compatible program for streaming hosts.
    pub fn with_extractor(mut self, program: impl Into<PathBuf>) -> Self {
        self.extractor = program.into();
        self
    }

    /// Download a video from a streaming host using yt-dlp
    async fn download_with_extractor(
        &self,
        url: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let id = Uuid::new_v4().to_string();
        // yt-dlp leaves .part/.ytdl files next to the target; all share the id
        let scratch = ScratchFiles::new(dest_dir, &id);
        let output_template = dest_dir.join(format!("{id}.%(ext)s"));
        let output = Command::new(&self.extractor)
            .arg(url)
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--extractor-args")
            .arg("youtube:player_client=android,web")
            .arg("-f")
            .arg("best")
            .arg("-o")
            .arg(&output_template)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout_str = String::from_utf8_lossy(output.stdout.as_slice());
        let filepath = stdout_str.trim();
        if filepath.is_empty() {
            return Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: "yt-dlp did not report an output file".to_string(),
            });
        }
        scratch.disarm();
        Ok(PathBuf::from(filepath))
    }

    async fn download_direct(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let mut response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::DownloadFailed {
                url: url.to_string(),
                reason: format!("server answered {}", response.status()),
            });
        }

        let extension = Path::new(response.url().path())
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| e.len() <= 5)
            .unwrap_or("mp4")
            .to_string();
        let path = dest_dir.join(format!("{}.{}", Uuid::new_v4(), extension));
        // the guard removes a half-written file if the stream breaks
        let guard = TempVideo::adopt(path);

        let mut file = fs::File::create(guard.path()).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(guard.keep())
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn download(&self, url: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        fs::create_dir_all(dest_dir).await?;

        match classify_url(url)? {
            FetchStrategy::Extractor => {
                tracing::info!(url, "Downloading with yt-dlp");
                self.download_with_extractor(url, dest_dir).await
            }
            FetchStrategy::DirectDownload => {
                tracing::info!(url, "Downloading over HTTP");
                self.download_direct(url, dest_dir).await
            }
        }
    }
}

/// Every file in `dir` whose name starts with `prefix`, removed on drop
/// unless the download finished.
struct ScratchFiles {
    dir: PathBuf,
    prefix: String,
    armed: bool,
}

impl ScratchFiles {
    fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed partial download"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download")
                }
            }
        }
    }
}

/// A local video owned by one workflow run; removed when dropped.
pub struct TempVideo {
    path: Option<PathBuf>,
}

impl TempVideo {
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Give up ownership without deleting the file.
    pub fn keep(mut self) -> PathBuf {
        self.path.take().unwrap_or_default()
    }
}

impl fmt::Debug for TempVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TempVideo").field(&self.path()).finish()
    }
}

impl Drop for TempVideo {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed temporary video"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary video")
            }
        }
    }
}
