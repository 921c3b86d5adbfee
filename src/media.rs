//! Content classification and attachment downloads.

use crate::error::{RelayError, Result};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "img"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];
const FILE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "zip", "rar", "txt", "csv",
];

/// How a message string will be transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Image,
    Video,
    File,
    /// An http(s) URL with an extension we cannot send
    Unsupported,
}

/// Attachment kinds accepted by `send_media`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

impl ContentKind {
    /// Classify a message by URL scheme and extension.
    ///
    /// Anything that is not an http(s) URL is text. Query strings and
    /// fragments are ignored when reading the extension.
    pub fn classify(message: &str) -> Self {
        let message = message.trim();
        if !(message.starts_with("http://") || message.starts_with("https://")) {
            return Self::Text;
        }

        let path = message
            .split(['?', '#'])
            .next()
            .unwrap_or(message)
            .to_lowercase();
        let ext = match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => ext,
            _ => return Self::Unsupported,
        };

        if IMAGE_EXTENSIONS.contains(&ext) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Self::Video
        } else if FILE_EXTENSIONS.contains(&ext) {
            Self::File
        } else {
            Self::Unsupported
        }
    }

    pub fn media(&self) -> Option<MediaKind> {
        match self {
            Self::Image => Some(MediaKind::Image),
            Self::Video => Some(MediaKind::Video),
            Self::File => Some(MediaKind::File),
            Self::Text | Self::Unsupported => None,
        }
    }
}

/// A downloaded attachment. The local copy is removed when this is dropped.
#[derive(Debug)]
pub struct DownloadedFile {
    path: PathBuf,
}

impl DownloadedFile {
    /// Take ownership of a local file; it is deleted on drop
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DownloadedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed downloaded file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove downloaded file")
            }
        }
    }
}

/// Fetches attachment URLs to local files
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<DownloadedFile>;
}

/// Downloads attachments over HTTP into a scratch directory
pub struct HttpFetcher {
    client: reqwest::Client,
    dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(dir: PathBuf, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Configuration(format!("building download client: {e}")))?;
        Ok(Self { client, dir })
    }

    async fn download_to(&self, url: &str, file: &DownloadedFile) -> Result<()> {
        let failed = |reason: String| RelayError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;

        let mut out = tokio::fs::File::create(file.path()).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failed(e.to_string()))?;
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<DownloadedFile> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let name = format!("{}-{}", uuid::Uuid::new_v4().simple(), file_name_from_url(url));
        let file = DownloadedFile::new(self.dir.join(name));

        // On error `file` drops here and any partial download is removed
        self.download_to(url, &file).await?;

        tracing::debug!(url = %url, path = %file.path().display(), "downloaded attachment");
        Ok(file)
    }
}

/// Last path segment of a URL, reduced to filesystem-safe characters
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or("");
    let decoded = urlencoding::decode(last)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| last.to_string());

    let safe: String = decoded
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.trim_matches('.').is_empty() {
        "attachment".to_string()
    } else {
        safe
    }
}
