//! Client-side package file cache
//!
//! Installed package files cross into the persistent cache as base64 text,
//! scoped by session, so a reloaded session can resolve them again. The cache
//! receives every file of the package, not only the assemblies.
//!
//! [`DirectoryCache`] keeps one merged mapping per session:
//! ```text
//! <root>/
//! ├── <session-id>/
//! │   └── files.json      # { "<package path>": "<base64>" }
//! └── ...
//! ```

use crate::fetch::PackageContents;
use crate::session::SessionId;
use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const FILES_NAME: &str = "files.json";

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Stored mapping could not be (de)serialized
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Entry is not valid base64
    #[error("Invalid base64 for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: base64::DecodeError,
    },

    /// Path not present in the payload
    #[error("File not found in cache: {0}")]
    NotCached(String),

    /// The cache counterpart refused the write
    #[error("Cache rejected the write: {0}")]
    Rejected(String),
}

/// Package files encoded for the cache: path -> base64 text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachePayload {
    files: BTreeMap<String, String>,
}

impl CachePayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every file of a package, assemblies and non-assemblies alike
    pub fn from_contents(contents: &PackageContents) -> Self {
        let engine = base64::engine::general_purpose::STANDARD;

        Self {
            files: contents
                .iter()
                .map(|(path, bytes)| (path.clone(), engine.encode(bytes)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Encoded text of one entry
    pub fn encoded(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Decode one entry back to the original bytes
    pub fn decode(&self, path: &str) -> Result<Vec<u8>, CacheError> {
        let encoded = self
            .files
            .get(path)
            .ok_or_else(|| CacheError::NotCached(path.to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|source| CacheError::Decode {
                path: path.to_string(),
                source,
            })
    }

    /// Add `other`'s entries, replacing entries with the same path
    ///
    /// Keys are package-relative paths, so files most packages ship
    /// (`[Content_Types].xml`, `_rels/.rels`, `README.md`) keep only the copy
    /// from the latest install.
    pub fn merge(&mut self, other: CachePayload) {
        self.files.extend(other.files);
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.files.iter()
    }
}

/// Persistent cache the installer hands package files to
#[async_trait]
pub trait CacheSink: Send + Sync {
    /// Store `payload` under `session`; must only return once it is durable
    async fn store(&self, session: &SessionId, payload: CachePayload) -> Result<(), CacheError>;
}

/// File-backed cache, one merged mapping per session
///
/// Later installs win on path clashes; see [`CachePayload::merge`].
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    /// Root cache directory
    root: PathBuf,
}

impl DirectoryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    fn files_path(&self, session: &SessionId) -> PathBuf {
        self.session_dir(session).join(FILES_NAME)
    }

    /// Everything stored for `session`; empty if nothing was cached yet
    pub async fn load(&self, session: &SessionId) -> Result<CachePayload, CacheError> {
        let path = self.files_path(session);

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CachePayload::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop every cached file of `session`
    pub async fn clear(&self, session: &SessionId) -> Result<(), CacheError> {
        let dir = self.session_dir(session);

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheSink for DirectoryCache {
    async fn store(&self, session: &SessionId, payload: CachePayload) -> Result<(), CacheError> {
        let dir = self.session_dir(session);
        tokio::fs::create_dir_all(&dir).await?;

        let mut merged = self.load(session).await?;
        let added = payload.len();
        merged.merge(payload);

        // Write to temporary file first (atomic write). A write abandoned by
        // an interrupted store can keep running, so each store gets its own
        // temporary file.
        let json = serde_json::to_vec(&merged)?;
        let suffix: u32 = rand::thread_rng().gen();
        let tmp_path = dir.join(format!("{}.{:08x}.tmp", FILES_NAME, suffix));
        tokio::fs::write(&tmp_path, &json).await?;

        // Commit point. No await follows, so a store interrupted before this
        // line has changed nothing and one that gets here reports success.
        if let Err(e) = std::fs::rename(&tmp_path, self.files_path(session)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(
            session = %session,
            added,
            total = merged.len(),
            "package files cached"
        );

        Ok(())
    }
}
