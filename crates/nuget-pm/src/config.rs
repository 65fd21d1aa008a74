//! Installer configuration
//!
//! Loaded from a TOML file (`~/.nuget-pm/config.toml` by default). Every field
//! has a default so an empty file is a valid configuration.
//!
//! ```toml
//! [index]
//! autocomplete_url = "https://api-v2v3search-0.nuget.org/autocomplete"
//! flat_container_url = "https://api.nuget.org/v3-flatcontainer"
//! max_search_results = 5
//!
//! [http]
//! request_timeout_secs = 30
//!
//! [cache]
//! root = "/tmp/nuget-cache"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default autocomplete endpoint of the package index
pub const DEFAULT_AUTOCOMPLETE_URL: &str = "https://api-v2v3search-0.nuget.org/autocomplete";

/// Default flat container endpoint (version lists and archives)
pub const DEFAULT_FLAT_CONTAINER_URL: &str = "https://api.nuget.org/v3-flatcontainer";

/// Number of search suggestions kept from the autocomplete endpoint
pub const DEFAULT_MAX_SEARCH_RESULTS: usize = 5;

/// Maximum size of a downloaded package archive (50 MB)
pub const DEFAULT_MAX_ARCHIVE_SIZE: u64 = 50 * 1024 * 1024;

/// Maximum total size of the files unpacked from one archive (256 MB)
pub const DEFAULT_MAX_EXTRACTED_SIZE: u64 = 256 * 1024 * 1024;

/// Errors that can occur while loading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parse error
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Complete installer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Package index endpoints
    pub index: IndexConfig,

    /// HTTP client settings
    pub http: HttpConfig,

    /// On-disk cache settings
    pub cache: CacheConfig,
}

/// Package index endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Autocomplete endpoint (`GET <url>?q=<prefix>`)
    pub autocomplete_url: String,

    /// Flat container base URL (`GET <url>/<id>/index.json`)
    pub flat_container_url: String,

    /// Number of suggestions kept from a search, at most 5
    pub max_search_results: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            autocomplete_url: DEFAULT_AUTOCOMPLETE_URL.to_string(),
            flat_container_url: DEFAULT_FLAT_CONTAINER_URL.to_string(),
            max_search_results: DEFAULT_MAX_SEARCH_RESULTS,
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Deadline for one network call, in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout, in seconds
    pub connect_timeout_secs: u64,

    /// Largest accepted package archive, in bytes
    pub max_archive_size: u64,

    /// Largest accepted total of unpacked file sizes, in bytes
    pub max_extracted_size: u64,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_archive_size: DEFAULT_MAX_ARCHIVE_SIZE,
            max_extracted_size: DEFAULT_MAX_EXTRACTED_SIZE,
            user_agent: format!("nuget-pm/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// On-disk cache settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root; `~/.nuget-pm/cache` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolve the cache root directory
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".nuget-pm").join("cache"))
                .unwrap_or_else(|| PathBuf::from(".nuget-pm").join("cache"))
        })
    }
}

impl InstallerConfig {
    /// Default config file location (`~/.nuget-pm/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".nuget-pm").join("config.toml"))
    }

    /// Load a configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a configuration from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: InstallerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint("index.autocomplete_url", &self.index.autocomplete_url)?;
        validate_endpoint("index.flat_container_url", &self.index.flat_container_url)?;

        if self.index.max_search_results == 0
            || self.index.max_search_results > DEFAULT_MAX_SEARCH_RESULTS
        {
            return Err(ConfigError::ValidationError(format!(
                "index.max_search_results must be between 1 and {}",
                DEFAULT_MAX_SEARCH_RESULTS
            )));
        }

        if self.http.request_timeout_secs == 0 || self.http.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "http timeouts must be greater than zero".to_string(),
            ));
        }

        if self.http.max_archive_size == 0 || self.http.max_extracted_size == 0 {
            return Err(ConfigError::ValidationError(
                "http size limits must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_endpoint(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::ValidationError(format!("{}: {} ({})", field, e, value)))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::ValidationError(format!(
            "{}: unsupported scheme '{}'",
            field, other
        ))),
    }
}
