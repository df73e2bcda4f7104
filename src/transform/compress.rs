//! Lossy image compression through the Tinify web API.
//!
//! Compression is best effort: without a key the step does nothing, and a
//! failed request leaves that image as it was. Results are cached by the
//! hash of the uncompressed bytes so rebuilding an unchanged image does not
//! spend another API call.

use std::fmt::Display;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::GlobError;
use crate::io::{as_overhead, glob_files};
use crate::transform::blocking;

pub const TINIFY_SHRINK: &str = "https://api.tinify.com/shrink";

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
const CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tinify rejected the request ({0}): {1}")]
    Api(StatusCode, String),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Deserialize)]
struct ShrinkResponse {
    output: ShrinkOutput,
}

#[derive(Debug, Deserialize)]
struct ShrinkOutput {
    url: String,
}

enum Outcome {
    Compressed,
    Cached,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub compressed: usize,
    pub cached: usize,
    pub skipped: usize,
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} compressed, {} from cache, {} skipped",
            self.compressed, self.cached, self.skipped
        )
    }
}

fn is_compressible(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

pub struct Compressor {
    client: Client,
    key: String,
    endpoint: String,
    cache: Utf8PathBuf,
}

impl Compressor {
    pub fn new(key: impl Into<String>, cache: impl Into<Utf8PathBuf>) -> Self {
        Self {
            client: Client::new(),
            key: key.into(),
            endpoint: String::from(TINIFY_SHRINK),
            cache: cache.into(),
        }
    }

    /// Send requests to a different shrink endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn shrink(&self, data: Vec<u8>) -> Result<Vec<u8>, CompressError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth("api", Some(&self.key))
            .body(data)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(CompressError::Api(status, body));
        }

        let shrunk: ShrinkResponse = response.json().await?;

        let bytes = self
            .client
            .get(&shrunk.output.url)
            .basic_auth("api", Some(&self.key))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(bytes.to_vec())
    }

    async fn compress_file(&self, path: &Utf8Path) -> Result<Outcome, CompressError> {
        let data = tokio::fs::read(path).await?;
        let cached = self.cache.join(blake3::hash(&data).to_hex().as_str());

        if let Ok(bytes) = tokio::fs::read(&cached).await {
            tokio::fs::write(path, bytes).await?;
            return Ok(Outcome::Cached);
        }

        let shrunk = self.shrink(data.clone()).await?;
        let bytes = if shrunk.len() < data.len() {
            tokio::fs::write(path, &shrunk).await?;
            shrunk
        } else {
            data
        };

        if let Some(dir) = cached.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&cached, bytes).await?;

        Ok(Outcome::Compressed)
    }

    /// Compress every png, jpeg and webp file under `dir` in place.
    pub async fn run(&self, dir: &Utf8Path) -> Result<Summary, CompressError> {
        let s = Instant::now();

        let files: Vec<_> = {
            let dir = dir.to_path_buf();
            blocking(move || glob_files(&dir, "**/*").map_err(CompressError::from))
                .await?
                .into_iter()
                .filter(|path| is_compressible(path))
                .collect()
        };

        let outcomes = futures::stream::iter(files)
            .map(|path: Utf8PathBuf| async move {
                let outcome = self.compress_file(&path).await;
                (path, outcome)
            })
            .buffer_unordered(CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let mut summary = Summary::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(Outcome::Compressed) => {
                    debug!("compressed {path}");
                    summary.compressed += 1;
                }
                Ok(Outcome::Cached) => summary.cached += 1,
                Err(e) => {
                    warn!("couldn't compress {path}, leaving it as is: {e}");
                    summary.skipped += 1;
                }
            }
        }

        info!("images: {summary} {}", as_overhead(s));

        Ok(summary)
    }
}

/// Compress the images under `dir` when `key` is set.
pub async fn compress_images(
    dir: Utf8PathBuf,
    key: Option<String>,
    cache: Utf8PathBuf,
) -> Result<Summary, CompressError> {
    let Some(key) = key else {
        info!("no compression key set, images are left uncompressed");
        return Ok(Summary::default());
    };

    Compressor::new(key, cache).run(&dir).await
}
