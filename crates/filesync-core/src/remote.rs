//! The remote project filesystem as seen by the engine
//!
//! [`RemoteFiles`] is implemented by the transport layer (GraphQL over HTTP
//! in production, an in-memory fake in tests). Everything crossing it uses
//! canonical project-relative paths.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use filesync_fs::HashSnapshot;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How [`FilePayload::content`] is represented on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
}

/// One file or directory crossing the sync boundary.
///
/// Directory payloads have a path ending in `/` and no content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    /// Permission bits; zero means "use the default".
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: Encoding,
}

impl FilePayload {
    /// Payload for raw bytes, as text when they are valid UTF-8.
    pub fn from_bytes(path: impl Into<String>, bytes: Vec<u8>, mode: u32) -> Self {
        let (content, encoding) = match String::from_utf8(bytes) {
            Ok(text) => (text, Encoding::Utf8),
            Err(err) => (STANDARD.encode(err.into_bytes()), Encoding::Base64),
        };
        Self {
            path: path.into(),
            old_path: None,
            mode,
            content,
            encoding,
        }
    }

    pub fn directory(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            mode,
            content: String::new(),
            encoding: Encoding::Utf8,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.path.ends_with('/')
    }

    /// The file's raw bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        match self.encoding {
            Encoding::Utf8 => Ok(self.content.clone().into_bytes()),
            Encoding::Base64 => STANDARD
                .decode(&self.content)
                .map_err(|e| Error::InvalidPayload {
                    path: self.path.clone(),
                    message: e.to_string(),
                }),
        }
    }
}

/// Changes the remote side pushed to us, tagged with the files version
/// they produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChangeBatch {
    #[serde(with = "crate::remote::version_string")]
    pub remote_files_version: u64,
    #[serde(default)]
    pub changed: Vec<FilePayload>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl RemoteChangeBatch {
    /// Drop every changed or deleted path for which `skip` holds.
    pub fn reject(&mut self, mut skip: impl FnMut(&str) -> bool) {
        self.changed.retain(|file| !skip(&file.path));
        self.deleted.retain(|path| !skip(path));
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Failures reported by a [`RemoteFiles`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The optimistic version token was stale
    #[error("Files version mismatch (remote is at {actual:?})")]
    VersionMismatch { actual: Option<u64> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Remote project filesystem operations.
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// Hash snapshot of the remote tree at a past files version.
    async fn hashes_at(&self, version: u64) -> std::result::Result<HashSnapshot, RemoteError>;

    /// Current files version and hash snapshot.
    async fn latest_hashes(&self) -> std::result::Result<(u64, HashSnapshot), RemoteError>;

    /// Contents of `paths` at `version`. Directory paths yield directory
    /// payloads.
    async fn files_at(
        &self,
        version: u64,
        paths: &[String],
    ) -> std::result::Result<Vec<FilePayload>, RemoteError>;

    /// Apply changes on top of `expected_version`, returning the new files
    /// version or [`RemoteError::VersionMismatch`].
    async fn publish(
        &self,
        expected_version: u64,
        changed: Vec<FilePayload>,
        deleted: Vec<String>,
    ) -> std::result::Result<u64, RemoteError>;
}

/// Files versions are 64-bit integers carried as decimal strings; older
/// state files stored plain numbers.
pub(crate) mod version_string {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(version: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(version) => Ok(version),
            Raw::Text(text) => text
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid files version {text:?}"))),
        }
    }
}
