//! SFTP source downloader
//!
//! Uses libssh2 via the `ssh2` crate; the whole session runs inside
//! `spawn_blocking` because the bindings are synchronous. Password auth
//! from URL userinfo or options, optional private key file from options.

use async_trait::async_trait;
use serde_json::json;
use ssh2::Session;
use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use tracing::debug;
use url::Url;

use super::{filename_from_url, DownloadRequest, DownloadResult, Downloader};
use crate::errors::DownloaderError;
use crate::models::OptionBag;
use crate::options::{opt_str, OptionDefinitions, OptionKind};

const DEFAULT_SFTP_PORT: u16 = 22;

pub struct SftpDownloader;

impl SftpDownloader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SftpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SftpTarget {
    addr: String,
    username: String,
    password: Option<String>,
    private_key: Option<String>,
    path: String,
}

fn parse_target(raw_url: &str, options: &OptionBag) -> Result<SftpTarget, DownloaderError> {
    let parsed = Url::parse(raw_url)
        .map_err(|e| DownloaderError::download_failed(raw_url, format!("invalid URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DownloaderError::download_failed(raw_url, "URL has no host"))?
        .to_string();
    let port = parsed.port().unwrap_or(DEFAULT_SFTP_PORT);

    let username = opt_str(options, "username")
        .map(|s| s.to_string())
        .or_else(|| {
            let u = parsed.username();
            (!u.is_empty()).then(|| u.to_string())
        })
        .ok_or_else(|| DownloaderError::download_failed(raw_url, "SFTP requires a username"))?;
    let password = opt_str(options, "password")
        .map(|s| s.to_string())
        .or_else(|| parsed.password().map(|p| p.to_string()));
    let private_key = opt_str(options, "private_key_path").map(|s| s.to_string());

    Ok(SftpTarget {
        addr: format!("{host}:{port}"),
        username,
        password,
        private_key,
        path: parsed.path().to_string(),
    })
}

fn fetch_blocking(url: &str, target: SftpTarget) -> Result<Vec<u8>, DownloaderError> {
    let tcp = TcpStream::connect(&target.addr)
        .map_err(|e| DownloaderError::connection_failed(url, e.to_string()))?;

    let mut session = Session::new()
        .map_err(|e| DownloaderError::download_failed(url, e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| DownloaderError::connection_failed(url, e.to_string()))?;

    if let Some(key_path) = &target.private_key {
        session
            .userauth_pubkey_file(
                &target.username,
                None,
                Path::new(key_path),
                target.password.as_deref(),
            )
            .map_err(|e| DownloaderError::download_failed(url, format!("key auth failed: {e}")))?;
    } else {
        session
            .userauth_password(&target.username, target.password.as_deref().unwrap_or(""))
            .map_err(|e| {
                DownloaderError::download_failed(url, format!("password auth failed: {e}"))
            })?;
    }

    let sftp = session
        .sftp()
        .map_err(|e| DownloaderError::download_failed(url, e.to_string()))?;
    let mut file = sftp
        .open(Path::new(&target.path))
        .map_err(|_| DownloaderError::file_not_found(url))?;

    let mut content = Vec::new();
    file.read_to_end(&mut content)
        .map_err(|e| DownloaderError::download_failed(url, e.to_string()))?;
    Ok(content)
}

#[async_trait]
impl Downloader for SftpDownloader {
    fn scheme(&self) -> &'static str {
        "sftp"
    }

    fn option_definitions(&self) -> OptionDefinitions {
        OptionDefinitions::new("SftpDownloader")
            .define(
                "username",
                OptionKind::String,
                json!(null),
                "login username (overrides URL userinfo)",
            )
            .define(
                "password",
                OptionKind::String,
                json!(null),
                "login password or key passphrase",
            )
            .define(
                "private_key_path",
                OptionKind::String,
                json!(null),
                "path to a private key file for public-key auth",
            )
    }

    async fn fetch(
        &self,
        request: &DownloadRequest,
        options: &OptionBag,
    ) -> Result<DownloadResult, DownloaderError> {
        let target = parse_target(&request.url, options)?;
        let url = request.url.clone();

        debug!(url = %url, addr = %target.addr, "fetching SFTP source");

        let content =
            tokio::task::spawn_blocking(move || fetch_blocking(&url, target))
                .await
                .map_err(|e| DownloaderError::download_failed(&request.url, e.to_string()))??;

        Ok(DownloadResult {
            filename: filename_from_url(&request.url),
            content,
            content_type: None,
            status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_is_required() {
        let err = parse_target("sftp://example.com/data.csv", &OptionBag::new()).unwrap_err();
        assert!(matches!(err, DownloaderError::DownloadFailed { .. }));
    }

    #[test]
    fn target_parsing() {
        let target =
            parse_target("sftp://deploy@files.example.com/exports/feed.xml", &OptionBag::new())
                .unwrap();
        assert_eq!(target.addr, "files.example.com:22");
        assert_eq!(target.username, "deploy");
        assert_eq!(target.path, "/exports/feed.xml");
        assert!(target.password.is_none());
    }
}
