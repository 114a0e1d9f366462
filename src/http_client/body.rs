//! Response body consumption with download limits.
//!
//! Limits are checked before and while the body streams, so an oversized
//! response is abandoned as soon as it crosses the limit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::LimitViolation;
use crate::transport::{BodyStream, TransportError};

/// Limits applied to a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyLimits {
    pub max_size: Option<u64>,
    /// Empty allows any content type.
    pub allowed_content_types: Vec<String>,
}

impl BodyLimits {
    /// Check the response head before reading the body.
    pub fn check_headers(&self, headers: &HashMap<String, String>) -> Result<(), LimitViolation> {
        let content_type = headers.get("content-type").map(|s| s.as_str());
        if !self.content_type_allowed(content_type) {
            return Err(LimitViolation::ContentType {
                content_type: content_type.map(str::to_string),
            });
        }

        if let (Some(limit), Some(length)) = (
            self.max_size,
            headers
                .get("content-length")
                .and_then(|v| v.trim().parse::<u64>().ok()),
        ) {
            if length > limit {
                return Err(LimitViolation::TooLarge {
                    limit,
                    received: length,
                });
            }
        }
        Ok(())
    }

    /// Whether a Content-Type value passes the allowlist.
    pub fn content_type_allowed(&self, content_type: Option<&str>) -> bool {
        if self.allowed_content_types.is_empty() {
            return true;
        }
        let Some(content_type) = content_type else {
            return false;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        self.allowed_content_types.iter().any(|allowed| {
            let allowed = allowed.trim().to_ascii_lowercase();
            match allowed.strip_suffix("/*") {
                Some("*") => true,
                Some(family) => essence
                    .split_once('/')
                    .is_some_and(|(kind, _)| kind == family),
                None => essence == allowed,
            }
        })
    }

    fn check_running(&self, received: u64) -> Result<(), LimitViolation> {
        match self.max_size {
            Some(limit) if received > limit => Err(LimitViolation::TooLarge { limit, received }),
            _ => Ok(()),
        }
    }
}

/// Why reading a body stopped.
#[derive(Debug)]
pub(crate) enum BodyError {
    Transport(TransportError),
    Limit(LimitViolation),
    Io(std::io::Error),
}

impl From<std::io::Error> for BodyError {
    fn from(error: std::io::Error) -> Self {
        BodyError::Io(error)
    }
}

/// Where a response body goes once the head has been accepted.
#[async_trait]
pub(crate) trait BodySink: Send + Sync {
    type Output: Send;

    /// Whether the download limits apply to this sink.
    fn enforces_limits(&self) -> bool {
        true
    }

    async fn consume(&self, body: BodyStream, limits: &BodyLimits)
        -> Result<Self::Output, BodyError>;

    /// Bytes received, for metadata.
    fn size(output: &Self::Output) -> u64;
}

/// Keeps the body in memory.
pub(crate) struct Buffer;

#[async_trait]
impl BodySink for Buffer {
    type Output = Bytes;

    async fn consume(&self, body: BodyStream, limits: &BodyLimits) -> Result<Bytes, BodyError> {
        read_to_bytes(body, limits).await
    }

    fn size(output: &Bytes) -> u64 {
        output.len() as u64
    }
}

/// Reads and drops the body (HEAD requests).
pub(crate) struct Discard;

#[async_trait]
impl BodySink for Discard {
    type Output = u64;

    fn enforces_limits(&self) -> bool {
        false
    }

    async fn consume(&self, body: BodyStream, _limits: &BodyLimits) -> Result<u64, BodyError> {
        drain(body).await
    }

    fn size(output: &u64) -> u64 {
        *output
    }
}

/// Streams the body into a file.
pub(crate) struct ToFile<'a> {
    pub dest: &'a Path,
}

#[async_trait]
impl<'a> BodySink for ToFile<'a> {
    type Output = StoredBody;

    async fn consume(
        &self,
        body: BodyStream,
        limits: &BodyLimits,
    ) -> Result<StoredBody, BodyError> {
        read_to_file(body, limits, self.dest).await
    }

    fn size(output: &StoredBody) -> u64 {
        output.size
    }
}

/// Buffer a body in memory.
pub(crate) async fn read_to_bytes(
    mut body: BodyStream,
    limits: &BodyLimits,
) -> Result<Bytes, BodyError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BodyError::Transport)?;
        limits
            .check_running((buffer.len() + chunk.len()) as u64)
            .map_err(BodyError::Limit)?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// Read and discard a body, returning its size.
pub(crate) async fn drain(mut body: BodyStream) -> Result<u64, BodyError> {
    let mut size = 0u64;
    while let Some(chunk) = body.next().await {
        size += chunk.map_err(BodyError::Transport)?.len() as u64;
    }
    Ok(size)
}

/// A body written to its final location.
#[derive(Debug)]
pub(crate) struct StoredBody {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

/// Stream a body into `dest`.
///
/// Data goes to a temporary file next to `dest` that is renamed into place
/// only after the whole body arrived; on any failure (including the future
/// being dropped) the partial file is removed.
pub(crate) async fn read_to_file(
    mut body: BodyStream,
    limits: &BodyLimits,
    dest: &Path,
) -> Result<StoredBody, BodyError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BodyError::Transport)?;
        size += chunk.len() as u64;
        limits.check_running(size).map_err(BodyError::Limit)?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    temp.persist(dest).map_err(|e| BodyError::Io(e.error))?;
    Ok(StoredBody {
        path: dest.to_path_buf(),
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}
