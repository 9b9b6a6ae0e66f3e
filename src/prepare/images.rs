//! Image preparation
//!
//! Fetches image URLs referenced by configured row fields into a local
//! media directory ahead of the prepare stage. Files are named by content
//! hash so repeated or shared images are stored once. Fetching fans out
//! over a bounded concurrent pool; this is the only concurrent section of
//! a run. A failed URL is recorded against each row that references it and
//! the original value is left in place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::mapper::FieldError;
use crate::models::{ImageOptions, Row};

const DEFAULT_CONCURRENCY: usize = 4;

/// Outcome of the images stage
#[derive(Debug, Default)]
pub struct ImagesOutcome {
    pub rows: Vec<Row>,
    /// URLs fetched (after dedup), not row-field references
    pub fetched: usize,
    pub failures: BTreeMap<usize, Vec<FieldError>>,
}

pub struct ImagePreparer {
    client: reqwest::Client,
    media_dir: PathBuf,
    concurrency: usize,
}

impl ImagePreparer {
    pub fn new(media_dir: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            media_dir: media_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub async fn prepare(&self, rows: Vec<Row>, options: &ImageOptions) -> ImagesOutcome {
        if !options.enabled || options.fields.is_empty() {
            return ImagesOutcome {
                rows,
                ..ImagesOutcome::default()
            };
        }

        let urls = collect_urls(&rows, &options.fields);
        if urls.is_empty() {
            return ImagesOutcome {
                rows,
                ..ImagesOutcome::default()
            };
        }

        debug!(urls = urls.len(), "fetching images");
        let fetched: Vec<(String, Result<String, String>)> = stream::iter(urls)
            .map(|url| async move {
                let outcome = self.fetch_one(&url).await;
                (url, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stored: HashMap<String, Result<String, String>> = HashMap::new();
        let mut fetch_count = 0;
        for (url, outcome) in fetched {
            if outcome.is_ok() {
                fetch_count += 1;
            } else if let Err(message) = &outcome {
                warn!(url = %url, error = %message, "image fetch failed");
            }
            stored.insert(url, outcome);
        }

        let mut outcome = ImagesOutcome {
            rows,
            fetched: fetch_count,
            failures: BTreeMap::new(),
        };
        for (index, row) in outcome.rows.iter_mut().enumerate() {
            let mut errors = Vec::new();
            for field in &options.fields {
                if let Some(value) = row.get_mut(field) {
                    rewrite_value(value, field, &stored, &mut errors);
                }
            }
            if !errors.is_empty() {
                outcome.failures.insert(index, errors);
            }
        }
        outcome
    }

    /// Download one URL into the media directory, returning the stored
    /// file name
    async fn fetch_one(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("unexpected status {}", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| format!("body read failed: {e}"))?;

        let name = format!("{}.{}", hex_digest(&bytes), extension_of(url));
        let path = self.media_dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(name);
        }
        tokio::fs::create_dir_all(&self.media_dir)
            .await
            .map_err(|e| format!("cannot create media dir: {e}"))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| format!("cannot store image: {e}"))?;
        Ok(name)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// File extension from the URL path, defaulting to `img`
fn extension_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let path = parsed.path().to_string();
            let (_, ext) = path.rsplit_once('.')?;
            if ext.is_empty() || ext.len() > 5 || !ext.chars().all(char::is_alphanumeric) {
                return None;
            }
            Some(ext.to_lowercase())
        })
        .unwrap_or_else(|| "img".to_string())
}

/// Every distinct URL referenced by the configured fields
fn collect_urls(rows: &[Row], fields: &[String]) -> BTreeSet<String> {
    let mut urls = BTreeSet::new();
    for row in rows {
        for field in fields {
            match row.get(field) {
                Some(Value::String(url)) if !url.trim().is_empty() => {
                    urls.insert(url.trim().to_string());
                }
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Value::String(url) = item {
                            if !url.trim().is_empty() {
                                urls.insert(url.trim().to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    urls
}

/// Swap fetched URLs for their stored names; failed URLs keep their
/// original value and the failure is recorded
fn rewrite_value(
    value: &mut Value,
    field: &str,
    stored: &HashMap<String, Result<String, String>>,
    errors: &mut Vec<FieldError>,
) {
    match value {
        Value::String(url) => match stored.get(url.trim()) {
            Some(Ok(name)) => *url = name.clone(),
            Some(Err(message)) => errors.push(FieldError {
                field: field.to_string(),
                message: message.clone(),
            }),
            None => {}
        },
        Value::Array(items) => {
            for item in items {
                rewrite_value(item, field, stored, errors);
            }
        }
        _ => {}
    }
}
