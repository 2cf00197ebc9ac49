use futures::StreamExt;
use reqwest::header::IF_MODIFIED_SINCE;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Default cap on a staged feed body.
pub const DEFAULT_MAX_FEED_BYTES: u64 = 10 * 1024 * 1024; // 10MB

const USER_AGENT: &str = concat!("feedstage/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT_SECS: u64 = 10;
const STAGED_EXTENSION: &str = "tmp";

/// Errors that can occur while staging a source.
///
/// Every variant is scoped to one source; none of them aborts a sync pass.
#[derive(Debug, Error)]
pub enum StageError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response that is neither 2xx nor 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The per-source timeout elapsed before the transfer finished
    #[error("Request timed out")]
    Timeout,
    /// The sync pass was interrupted before the transfer finished
    #[error("Cancelled")]
    Cancelled,
    /// Writing the staged artifact failed
    #[error("Staging I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: u64 },
}

/// Raw feed bytes staged on disk for one source.
#[derive(Debug, Clone)]
pub struct StagedContent {
    /// Source URL the bytes were fetched from
    pub source: String,
    /// Location of the staged bytes
    pub path: PathBuf,
    /// Unix seconds at which the response was received
    pub fetched_at: i64,
    /// Number of bytes staged
    pub size: u64,
}

/// Successful result of staging a source.
#[derive(Debug)]
pub enum StageOutcome {
    /// A fresh body was written to disk
    Staged(StagedContent),
    /// The server reported no change since the last sync; nothing was written
    NotModified,
}

/// Builds the HTTP client shared by all staging tasks.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
}

/// Stable, filesystem-safe staging key for a source URL (hex SHA-256).
///
/// Derived from the URL only, never from feed content or title, so two
/// distinct sources can never share an artifact.
pub fn staging_key(source: &str) -> String {
    format!("{:x}", Sha256::digest(source.as_bytes()))
}

/// Fetches feed bytes into a content-addressed staging directory.
#[derive(Debug, Clone)]
pub struct Stager {
    client: reqwest::Client,
    dir: PathBuf,
    max_bytes: u64,
}

impl Stager {
    pub fn new(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
            max_bytes: DEFAULT_MAX_FEED_BYTES,
        }
    }

    /// Override the body size limit.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the artifact for `source` lives while staged.
    pub fn staging_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", staging_key(source), STAGED_EXTENSION))
    }

    /// Fetches `source` and stages its body.
    ///
    /// When `last_synced` is known it is sent as `If-Modified-Since`; a `304`
    /// answer yields [`StageOutcome::NotModified`] and leaves the staging
    /// directory untouched. Any failure after the artifact was created deletes
    /// it before returning.
    ///
    /// # Errors
    ///
    /// - [`StageError::Network`] - Connection, TLS or body read errors
    /// - [`StageError::HttpStatus`] - Any status other than 2xx or 304
    /// - [`StageError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`StageError::IncompleteResponse`] - Body shorter than Content-Length
    /// - [`StageError::Io`] - Staging directory or file could not be written
    pub async fn stage(
        &self,
        source: &str,
        last_synced: Option<i64>,
    ) -> Result<StageOutcome, StageError> {
        let mut request = self.client.get(source);
        if let Some(since) = last_synced.and_then(http_date) {
            request = request.header(IF_MODIFIED_SINCE, since);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!(source = %source, "Source not modified since last sync");
            return Ok(StageOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(StageError::HttpStatus(status.as_u16()));
        }

        let fetched_at = chrono::Utc::now().timestamp();
        let path = self.staging_path(source);
        tokio::fs::create_dir_all(&self.dir).await?;

        match write_limited_body(response, &path, self.max_bytes).await {
            Ok(size) => {
                tracing::debug!(source = %source, path = %path.display(), bytes = size, "Staged source");
                Ok(StageOutcome::Staged(StagedContent {
                    source: source.to_string(),
                    path,
                    fetched_at,
                    size,
                }))
            }
            Err(e) => {
                remove_artifact(&path).await;
                Err(e)
            }
        }
    }

    /// [`stage`](Self::stage) bounded by a timeout and a shared cancellation token.
    ///
    /// A token that is already cancelled settles immediately without issuing a
    /// request. If the token fires or the timeout elapses mid-transfer, the
    /// transfer is dropped and any partially written artifact is deleted.
    pub async fn stage_with_cancel(
        &self,
        source: &str,
        last_synced: Option<i64>,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<StageOutcome, StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(StageError::Cancelled),

            staged = tokio::time::timeout(timeout, self.stage(source, last_synced)) => {
                staged.unwrap_or(Err(StageError::Timeout))
            }
        };

        if matches!(result, Err(StageError::Cancelled | StageError::Timeout)) {
            remove_artifact(&self.staging_path(source)).await;
        }
        result
    }

    /// Deletes artifacts left behind by an earlier pass that did not finish.
    ///
    /// Only files named like staging artifacts are touched, so the staging
    /// directory may be shared. Returns the number of files removed.
    pub async fn purge_stale(&self) -> std::io::Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if is_staging_artifact(&path) {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(dir = %self.dir.display(), removed = removed, "Purged stale staging artifacts");
        }
        Ok(removed)
    }
}

/// Formats Unix seconds as an IMF-fixdate (`Tue, 15 Nov 1994 12:45:26 GMT`).
fn http_date(timestamp: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

fn is_staging_artifact(path: &Path) -> bool {
    let extension_matches = path.extension().and_then(|e| e.to_str()) == Some(STAGED_EXTENSION);
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()));
    extension_matches && stem_matches
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial staging artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging artifact")
        }
    }
}

async fn write_limited_body(
    response: reqwest::Response,
    path: &Path,
    limit: u64,
) -> Result<u64, StageError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if expected_length.is_some_and(|len| len > limit) {
        return Err(StageError::ResponseTooLarge);
    }

    // Created inline rather than on the blocking pool: a cancelled transfer
    // must never see its artifact appear after cleanup has already run
    let mut file = tokio::fs::File::from_std(std::fs::File::create(path)?);
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        written = written.saturating_add(chunk.len() as u64);
        if written > limit {
            return Err(StageError::ResponseTooLarge);
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if let Some(expected) = expected_length {
        if written < expected {
            return Err(StageError::IncompleteResponse {
                expected,
                received: written,
            });
        }
    }

    Ok(written)
}
