//! HTTP/HTTPS source downloader
//!
//! Fetches source content over reqwest with configurable timeout and user
//! agent. One instance serves one scheme; http and https are registered as
//! two instances of the same type.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{
    filename_from_url, parse_content_disposition, DownloadRequest, DownloadResult, Downloader,
};
use crate::errors::DownloaderError;
use crate::models::OptionBag;
use crate::options::{opt_str, opt_usize, OptionDefinitions, OptionKind};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_USER_AGENT: &str = concat!("feedpipe/", env!("CARGO_PKG_VERSION"));

pub struct HttpDownloader {
    scheme: &'static str,
}

impl HttpDownloader {
    pub fn new(scheme: &'static str) -> Self {
        Self { scheme }
    }

    fn build_client(&self, options: &OptionBag) -> Result<Client, DownloaderError> {
        let timeout = opt_usize(options, "timeout_seconds")
            .map(|s| s as u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let user_agent = opt_str(options, "user_agent")
            .unwrap_or(DEFAULT_USER_AGENT)
            .to_string();
        Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()
            .map_err(|e| DownloaderError::download_failed("", e.to_string()))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("HttpDownloader")
            .define(
                "timeout_seconds",
                OptionKind::Integer,
                json!(DEFAULT_TIMEOUT_SECS),
                "request timeout in seconds",
            )
            .define(
                "user_agent",
                OptionKind::String,
                json!(DEFAULT_USER_AGENT),
                "User-Agent header sent with the request",
            )
    }

    async fn fetch(
        &self,
        request: &DownloadRequest,
        options: &OptionBag,
    ) -> Result<DownloadResult, DownloaderError> {
        let client = self.build_client(options)?;

        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| {
                DownloaderError::download_failed(
                    &request.url,
                    format!("invalid HTTP method '{}'", request.method),
                )
            })?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(url = %request.url, method = %request.method, "fetching HTTP source");

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DownloaderError::connection_failed(&request.url, e.to_string())
            } else {
                DownloaderError::download_failed(&request.url, e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
            return Err(DownloaderError::file_not_found(&request.url));
        }
        if !status.is_success() {
            return Err(DownloaderError::download_failed(
                &request.url,
                format!("HTTP status {status}"),
            ));
        }

        let filename = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition)
            .or_else(|| filename_from_url(&request.url));
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let status_code = status.as_u16();

        let content = response
            .bytes()
            .await
            .map_err(|e| DownloaderError::download_failed(&request.url, e.to_string()))?
            .to_vec();

        debug!(
            url = %request.url,
            bytes = content.len(),
            status = status_code,
            "HTTP source fetched"
        );

        Ok(DownloadResult {
            content,
            filename,
            content_type,
            status: Some(status_code),
        })
    }
}
