//! Artifact fetcher: skip-if-present downloads of large remote files.
//!
//! Bodies are streamed into `<destination>.part` and renamed into place
//! only after the presence check passes, so an interrupted transfer never
//! leaves a file that a later run would mistake for a complete one.

use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

/// How to tell that an artifact is already complete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresenceCheck {
    /// File exists and is not empty.
    #[default]
    NonEmpty,
    /// File exists and has at least this many bytes.
    MinSize(u64),
    /// File exists and its SHA-256 matches (hex).
    Sha256(String),
}

impl PresenceCheck {
    /// Whether `path` satisfies the check. Missing files never do.
    pub async fn is_satisfied(&self, path: &Path) -> Result<bool> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match self {
            PresenceCheck::NonEmpty => Ok(meta.len() > 0),
            PresenceCheck::MinSize(min) => Ok(meta.len() >= *min),
            PresenceCheck::Sha256(expected) => {
                Ok(sha256_file(path).await?.eq_ignore_ascii_case(expected))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PresenceCheck::NonEmpty => "non-empty".to_string(),
            PresenceCheck::MinSize(min) => format!("at least {} bytes", min),
            PresenceCheck::Sha256(hash) => format!("sha256 {}", hash),
        }
    }
}

/// A remote file required by the provisioned application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub url: String,
    pub destination: PathBuf,
    #[serde(default)]
    pub check: PresenceCheck,
}

impl ArtifactDescriptor {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            check: PresenceCheck::default(),
        }
    }

    pub fn with_check(mut self, check: PresenceCheck) -> Self {
        self.check = check;
        self
    }

    /// Where the body is staged while downloading.
    pub fn staging_path(&self) -> PathBuf {
        let mut name = self
            .destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.destination.with_file_name(name)
    }
}

/// Outcome of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Artifact already present; no network call made.
    Skipped,
    /// Artifact downloaded.
    Downloaded { bytes: u64 },
}

/// Network layer used by the fetcher.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stream the body at `url` into `sink`, returning the byte count.
    async fn download(&self, url: &str, sink: &mut File) -> std::result::Result<u64, String>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn download(&self, url: &str, sink: &mut File) -> std::result::Result<u64, String> {
        (**self).download(url, sink).await
    }
}

/// HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str, sink: &mut File) -> std::result::Result<u64, String> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
            sink.write_all(&chunk).await.map_err(|e| e.to_string())?;
            written += chunk.len() as u64;
        }
        sink.flush().await.map_err(|e| e.to_string())?;
        Ok(written)
    }
}

/// Downloads artifacts through a [`Transport`].
pub struct ArtifactFetcher<T: Transport> {
    transport: T,
}

impl<T: Transport> ArtifactFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch unless the destination already satisfies its presence check.
    pub async fn fetch(&self, artifact: &ArtifactDescriptor) -> Result<FetchOutcome> {
        if artifact.check.is_satisfied(&artifact.destination).await? {
            debug!(url = %artifact.url, dest = ?artifact.destination, "Artifact present");
            return Ok(FetchOutcome::Skipped);
        }

        let fail = |reason: String| ProvisionError::ArtifactFetch {
            url: artifact.url.clone(),
            reason,
        };

        if let Some(parent) = artifact.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = artifact.staging_path();
        info!(url = %artifact.url, dest = ?artifact.destination, "Downloading artifact");
        let mut file = File::create(&staging).await?;
        let downloaded = match self.transport.download(&artifact.url, &mut file).await {
            Ok(bytes) => file.flush().await.map(|_| bytes).map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };
        drop(file);

        let bytes = match downloaded {
            Ok(bytes) => bytes,
            Err(reason) => {
                discard(&staging).await;
                return Err(fail(reason));
            }
        };

        if !artifact.check.is_satisfied(&staging).await? {
            discard(&staging).await;
            return Err(fail(format!(
                "downloaded file is not {}",
                artifact.check.describe()
            )));
        }

        tokio::fs::rename(&staging, &artifact.destination).await?;
        info!(url = %artifact.url, bytes = bytes, "Artifact downloaded");
        Ok(FetchOutcome::Downloaded { bytes })
    }
}

async fn discard(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

/// Hex SHA-256 of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
