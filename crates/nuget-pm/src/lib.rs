//! NuGet package installer library
//!
//! This crate drives the acquisition of NuGet packages for an in-browser
//! compilation session:
//! - Package name autocompletion and version listing (package index)
//! - Package archive download and in-memory extraction
//! - Assembly reference registration for the compilation session
//! - Persistent client-side cache population (base64 payloads)
//! - The install state machine tying the steps together

pub mod cache;
pub mod call;
pub mod config;
pub mod fetch;
pub mod index;
pub mod installer;
pub mod logging;
pub mod notify;
pub mod references;
pub mod session;

pub use cache::{CacheError, CachePayload, CacheSink, DirectoryCache};
pub use call::{CallPolicy, CancelHandle, Stage};
pub use config::{CacheConfig, ConfigError, HttpConfig, IndexConfig, InstallerConfig};
pub use fetch::{
    extract_archive, is_assembly_path, FetchError, NuGetContentFetcher, PackageContents,
    PackageIdentity, PackageSource,
};
pub use index::{IndexError, NuGetIndexClient, PackageIndex};
pub use installer::{
    Collaborators, ErrorKind, InstallError, InstallReport, Installer, PipelineSnapshot,
    PipelineState,
};
pub use notify::{ConsoleNotifier, Notification, NotificationSink, Severity, TracingNotifier};
pub use references::{ReferenceRegistry, ReferenceSink};
pub use session::{SessionError, SessionId};
