//! Package content fetching
//!
//! Downloads a `.nupkg` archive from the flat container and unpacks every
//! entry into memory. Extraction is all-or-nothing: a failure on any entry
//! discards everything read so far.

use crate::config::{HttpConfig, IndexConfig, DEFAULT_MAX_EXTRACTED_SIZE};
use crate::index::flat_container_url;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while downloading or unpacking a package
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    /// Package or version unknown to the index
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Archive larger than the configured limit
    #[error("Content too large: {size} bytes (max: {max})")]
    ContentTooLarge { size: u64, max: u64 },

    /// Archive could not be decompressed
    #[error("Corrupt package archive: {0}")]
    CorruptArchive(String),

    /// Archive lists the same file twice
    #[error("Corrupt package archive: duplicate entry {0}")]
    DuplicateEntry(String),

    /// Unpacked files exceed the extraction budget
    #[error("Corrupt package archive: unpacked size exceeds {max} bytes")]
    ExtractedTooLarge { max: u64 },
}

impl FetchError {
    /// Whether the failure happened while unpacking rather than downloading
    pub fn is_corrupt_archive(&self) -> bool {
        matches!(
            self,
            FetchError::CorruptArchive(_)
                | FetchError::DuplicateEntry(_)
                | FetchError::ExtractedTooLarge { .. }
        )
    }
}

/// A package id together with one of its published versions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    name: String,
    version: String,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Archive file name: `<lower id>.<lower version>.nupkg`
    pub fn archive_file_name(&self) -> String {
        format!(
            "{}.{}.nupkg",
            self.name.to_lowercase(),
            self.version.to_lowercase()
        )
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Every file of one package, keyed by its archive-relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageContents {
    files: BTreeMap<String, Vec<u8>>,
    archive_checksum: Option<String>,
}

impl PackageContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build contents from already unpacked files
    pub fn from_files<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<u8>)>,
        P: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(p, b)| (p.into(), b)).collect(),
            archive_checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.archive_checksum = Some(checksum);
        self
    }

    /// SHA-256 (hex) of the archive the files came from
    pub fn archive_checksum(&self) -> Option<&str> {
        self.archive_checksum.as_deref()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<u8>> {
        self.files.iter()
    }

    /// Managed assembly images (`.dll` entries) of the package
    pub fn assemblies(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files
            .iter()
            .filter(|(path, _)| is_assembly_path(path))
            .map(|(path, bytes)| (path.as_str(), bytes.as_slice()))
    }

    pub fn total_size(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

impl<'a> IntoIterator for &'a PackageContents {
    type Item = (&'a String, &'a Vec<u8>);
    type IntoIter = btree_map::Iter<'a, String, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Whether an archive path names a managed assembly
///
/// The extension compare ignores ASCII case, so `Foo.DLL` is an assembly
/// too. An exact `.dll` match would leave such files out of the references
/// while still caching them.
pub fn is_assembly_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
}

/// Unpack a zip archive held in memory
///
/// Directory entries are skipped. Paths are kept exactly as archived. The
/// unpacked files may total at most `max_extracted` bytes; past that the
/// whole archive is rejected.
pub fn extract_archive(
    archive_bytes: &[u8],
    max_extracted: u64,
) -> Result<PackageContents, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| FetchError::CorruptArchive(e.to_string()))?;

    let mut files = BTreeMap::new();
    let mut remaining = max_extracted;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| FetchError::CorruptArchive(format!("entry {}: {}", i, e)))?;

        if entry.is_dir() {
            continue;
        }

        // Declared sizes can lie, so the read itself is bounded as well
        if entry.size() > remaining {
            return Err(FetchError::ExtractedTooLarge { max: max_extracted });
        }

        let path = entry.name().to_string();
        let mut bytes = Vec::new();
        (&mut entry)
            .take(remaining.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::CorruptArchive(format!("{}: {}", path, e)))?;

        let read = bytes.len() as u64;
        if read > remaining {
            return Err(FetchError::ExtractedTooLarge { max: max_extracted });
        }
        remaining -= read;

        if files.insert(path.clone(), bytes).is_some() {
            return Err(FetchError::DuplicateEntry(path));
        }
    }

    Ok(PackageContents {
        files,
        archive_checksum: None,
    })
}

/// Compute SHA-256 checksum of bytes
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Source of package contents
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Download and unpack every file of `identity`
    async fn download(&self, identity: &PackageIdentity) -> Result<PackageContents, FetchError>;
}

/// Downloads packages from the NuGet flat container
pub struct NuGetContentFetcher {
    client: Client,
    flat_container_url: String,
    max_size: u64,
    max_extracted: u64,
}

impl NuGetContentFetcher {
    pub fn new(index: &IndexConfig, http: &HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(http.request_timeout())
            .connect_timeout(http.connect_timeout())
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, index, http.max_archive_size)
            .with_max_extracted_size(http.max_extracted_size))
    }

    pub fn with_client(client: Client, index: &IndexConfig, max_size: u64) -> Self {
        Self {
            client,
            flat_container_url: index.flat_container_url.clone(),
            max_size,
            max_extracted: DEFAULT_MAX_EXTRACTED_SIZE,
        }
    }

    /// Limit the total size of the files unpacked from one archive
    pub fn with_max_extracted_size(mut self, max_extracted: u64) -> Self {
        self.max_extracted = max_extracted;
        self
    }

    /// `<flat>/<lower id>/<lower version>/<lower id>.<lower version>.nupkg`
    pub fn archive_url(&self, identity: &PackageIdentity) -> Result<url::Url, FetchError> {
        let id = identity.name().to_lowercase();
        let version = identity.version().to_lowercase();
        let file = identity.archive_file_name();

        let segments = [id.as_str(), version.as_str(), file.as_str()];

        flat_container_url(&self.flat_container_url, &segments).map_err(FetchError::InvalidUrl)
    }

    /// Fetch the raw archive, enforcing the size limit
    async fn fetch_archive(&self, identity: &PackageIdentity) -> Result<Vec<u8>, FetchError> {
        let url = self.archive_url(identity)?;
        debug!(%url, "downloading package archive");

        let mut response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::PackageNotFound(identity.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_size {
                return Err(FetchError::ContentTooLarge {
                    size: len,
                    max: self.max_size,
                });
            }
        }

        let mut content = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            content.extend_from_slice(&chunk);
            if content.len() as u64 > self.max_size {
                return Err(FetchError::ContentTooLarge {
                    size: content.len() as u64,
                    max: self.max_size,
                });
            }
        }

        Ok(content)
    }
}

#[async_trait]
impl PackageSource for NuGetContentFetcher {
    async fn download(&self, identity: &PackageIdentity) -> Result<PackageContents, FetchError> {
        let archive = self.fetch_archive(identity).await?;
        let checksum = compute_checksum(&archive);

        let contents =
            extract_archive(&archive, self.max_extracted)?.with_checksum(checksum.clone());

        info!(
            package = %identity,
            archive_size = archive.len(),
            checksum = %checksum,
            entries = contents.len(),
            "package downloaded"
        );

        Ok(contents)
    }
}
