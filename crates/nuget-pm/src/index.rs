//! Package index client
//!
//! Name autocompletion and version listing against the NuGet index:
//! - `GET <autocomplete>?q=<prefix>` returns `{"data": [..names..]}`
//! - `GET <flat-container>/<id>/index.json` returns `{"versions": [..]}`,
//!   oldest first

use crate::config::{HttpConfig, IndexConfig, DEFAULT_MAX_SEARCH_RESULTS};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while querying the package index
#[derive(Debug, Error)]
pub enum IndexError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Response body did not have the expected shape
    #[error("Unexpected index response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Package not found
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// Index unavailable
    #[error("Package index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, IndexError::PackageNotFound(_))
    }
}

/// Response of the autocomplete endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocompleteResponse {
    /// Total number of matches known to the index
    #[serde(rename = "totalHits", default, skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u64>,

    /// Matching package ids, most relevant first
    pub data: Vec<String>,
}

/// Response of the flat container version index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionIndexResponse {
    /// Published versions, oldest first
    pub versions: Vec<String>,
}

/// Read-only view of a package index
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Package ids matching `prefix`, most relevant first
    async fn search_names(&self, prefix: &str) -> Result<Vec<String>, IndexError>;

    /// Versions of `name`, newest first
    async fn list_versions(&self, name: &str) -> Result<Vec<String>, IndexError>;
}

/// HTTP client for the NuGet index
pub struct NuGetIndexClient {
    /// HTTP client
    client: Client,

    /// Autocomplete endpoint
    autocomplete_url: String,

    /// Flat container base URL
    flat_container_url: String,

    /// Number of suggestions kept, never more than five
    max_results: usize,
}

impl NuGetIndexClient {
    /// Create a client for the given endpoints
    pub fn new(index: &IndexConfig, http: &HttpConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(http.request_timeout())
            .connect_timeout(http.connect_timeout())
            .user_agent(http.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, index))
    }

    /// Create a client sharing an existing connection pool
    pub fn with_client(client: Client, index: &IndexConfig) -> Self {
        Self {
            client,
            autocomplete_url: index.autocomplete_url.clone(),
            flat_container_url: index.flat_container_url.clone(),
            max_results: index.max_search_results.min(DEFAULT_MAX_SEARCH_RESULTS),
        }
    }

    fn autocomplete_endpoint(&self, prefix: &str) -> Result<url::Url, IndexError> {
        let mut url = url::Url::parse(&self.autocomplete_url)
            .map_err(|e| IndexError::InvalidUrl(format!("{}: {}", self.autocomplete_url, e)))?;
        url.query_pairs_mut().append_pair("q", prefix);
        Ok(url)
    }

    /// `<flat>/<lower id>/index.json`
    pub fn versions_url(&self, name: &str) -> Result<url::Url, IndexError> {
        let id = name.to_lowercase();
        flat_container_url(&self.flat_container_url, &[id.as_str(), "index.json"])
            .map_err(IndexError::InvalidUrl)
    }
}

#[async_trait]
impl PackageIndex for NuGetIndexClient {
    async fn search_names(&self, prefix: &str) -> Result<Vec<String>, IndexError> {
        let url = self.autocomplete_endpoint(prefix)?;
        debug!(%url, "querying autocomplete");

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(IndexError::Unavailable(format!(
                "Autocomplete returned status {}",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let parsed: AutocompleteResponse = serde_json::from_slice(&body)?;

        Ok(truncate_suggestions(parsed.data, self.max_results))
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<String>, IndexError> {
        let url = self.versions_url(name)?;
        debug!(%url, "querying version index");

        let response = self.client.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(IndexError::PackageNotFound(name.to_string()));
        }

        if !response.status().is_success() {
            return Err(IndexError::Unavailable(format!(
                "Version index returned status {}",
                response.status()
            )));
        }

        let body = response.bytes().await?;
        let parsed: VersionIndexResponse = serde_json::from_slice(&body)?;

        Ok(newest_first(parsed.versions))
    }
}

/// Keep the first `max` suggestions in index order
pub fn truncate_suggestions(mut names: Vec<String>, max: usize) -> Vec<String> {
    names.truncate(max);
    names
}

/// Reverse the index's oldest-first order
pub fn newest_first(mut versions: Vec<String>) -> Vec<String> {
    versions.reverse();
    versions
}

/// Append percent-encoded path segments to a flat container base URL
pub fn flat_container_url(base: &str, segments: &[&str]) -> Result<url::Url, String> {
    let mut url = url::Url::parse(base).map_err(|e| format!("{}: {}", base, e))?;

    url.path_segments_mut()
        .map_err(|_| format!("{}: cannot be a base URL", base))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}
