//! Pluggable source fetchers behind one contract
//!
//! Each URL scheme (http, https, ftp, sftp) is an independent plugin
//! selected through [`DownloaderFactory`]. Every plugin runs the shared
//! option validate/merge contract before any scheme-specific I/O, and maps
//! its failures onto the three downloader error kinds so callers can tell
//! retryable transport failures from permanent ones.

pub mod ftp;
pub mod http;
pub mod sftp;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::errors::{DownloaderError, EngineError, FactoryError};
use crate::models::{OptionBag, SourceConfig};
use crate::options::OptionDefinitions;

/// What to fetch and how
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Unified options bag; each plugin picks out what it declared
    pub options: OptionBag,
}

impl DownloadRequest {
    pub fn from_source(source: &SourceConfig) -> Self {
        Self {
            url: source.url.clone(),
            method: source.method.clone(),
            headers: source.headers.clone(),
            body: source.body.clone(),
            options: source.options.clone(),
        }
    }
}

/// Raw fetched content plus resolved metadata
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub content: Vec<u8>,
    /// Best-effort filename: Content-Disposition when present, else the
    /// last URL path segment
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub status: Option<u16>,
}

/// One scheme-specific source fetcher
#[async_trait]
pub trait Downloader: Send + Sync {
    fn scheme(&self) -> &'static str;

    fn option_definitions(&self) -> OptionDefinitions;

    /// Scheme-specific I/O; `options` is already validated and merged
    async fn fetch(
        &self,
        request: &DownloadRequest,
        options: &OptionBag,
    ) -> Result<DownloadResult, DownloaderError>;

    /// Shared entry point: validate and merge options, then fetch.
    /// No retry happens here; retry/backoff is an execution-level policy.
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult, EngineError> {
        let defs = self.option_definitions();
        defs.validate(&request.options)?;
        let options = defs.merge_with_defaults(&request.options);
        Ok(self.fetch(request, &options).await?)
    }
}

/// Scheme-keyed downloader registry
pub struct DownloaderFactory {
    downloaders: BTreeMap<&'static str, Arc<dyn Downloader>>,
}

impl DownloaderFactory {
    pub fn new() -> Self {
        Self {
            downloaders: BTreeMap::new(),
        }
    }

    /// Factory pre-populated with the built-in scheme plugins
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(Arc::new(http::HttpDownloader::new("http")));
        factory.register(Arc::new(http::HttpDownloader::new("https")));
        factory.register(Arc::new(ftp::FtpDownloader::new()));
        factory.register(Arc::new(sftp::SftpDownloader::new()));
        factory
    }

    pub fn register(&mut self, downloader: Arc<dyn Downloader>) {
        self.downloaders.insert(downloader.scheme(), downloader);
    }

    pub fn for_scheme(&self, scheme: &str) -> Result<Arc<dyn Downloader>, FactoryError> {
        self.downloaders
            .get(scheme)
            .cloned()
            .ok_or_else(|| FactoryError::UnsupportedType {
                kind: "downloader",
                requested: scheme.to_string(),
                available: self.available_schemes().join(", "),
            })
    }

    pub fn has(&self, scheme: &str) -> bool {
        self.downloaders.contains_key(scheme)
    }

    pub fn available_schemes(&self) -> Vec<&'static str> {
        self.downloaders.keys().copied().collect()
    }
}

impl Default for DownloaderFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Parse a filename out of a Content-Disposition style header value
pub(crate) fn parse_content_disposition(value: &str) -> Option<String> {
    value.split(';').find_map(|part| {
        let part = part.trim();
        let rest = part.strip_prefix("filename=")?;
        let name = rest.trim().trim_matches('"').trim();
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// Fallback filename: last non-empty path segment of the URL
pub(crate) fn filename_from_url(raw_url: &str) -> Option<String> {
    let parsed = url::Url::parse(raw_url).ok()?;
    parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()
        .map(|s| s.to_string())
}
