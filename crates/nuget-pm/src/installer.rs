//! Install orchestration
//!
//! Drives one session's package installs through the pipeline:
//!
//! ```text
//! Idle -> Searching -> Idle
//! Idle | Searching -> VersionSelecting
//! VersionSelecting -> Downloading -> Integrating -> CachePopulating -> Done
//! (any in-flight state) -> Failed
//! ```
//!
//! Package files are written to the cache before the assemblies are handed to
//! the reference sink, so a cache failure leaves the compilation session
//! untouched. Every terminal outcome produces exactly one notification.

use crate::cache::{CacheError, CachePayload, CacheSink};
use crate::call::{CallPolicy, CancelHandle, Interrupted, Stage};
use crate::config::InstallerConfig;
use crate::fetch::{FetchError, NuGetContentFetcher, PackageIdentity, PackageSource};
use crate::index::{IndexError, NuGetIndexClient, PackageIndex};
use crate::notify::{Notification, NotificationSink, Severity};
use crate::references::ReferenceSink;
use crate::session::SessionId;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// User-facing classification of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or parse failure talking to the package index
    IndexUnavailable,
    /// The index has no such package or version
    PackageNotFound,
    /// Archive retrieval failed
    DownloadFailed,
    /// Archive could not be decompressed
    CorruptArchive,
    /// The client cache did not accept the package files
    CacheWriteFailed,
    /// Request refused without touching the pipeline (busy, bad selection)
    Rejected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::IndexUnavailable => "index unavailable",
            ErrorKind::PackageNotFound => "package not found",
            ErrorKind::DownloadFailed => "download failed",
            ErrorKind::CorruptArchive => "corrupt archive",
            ErrorKind::CacheWriteFailed => "cache write failed",
            ErrorKind::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during installer operations
#[derive(Debug, Error)]
pub enum InstallError {
    /// Package index error
    #[error("{0}")]
    Index(#[from] IndexError),

    /// Download or extraction error
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Cache write error
    #[error("{0}")]
    Cache(#[from] CacheError),

    /// A boundary call exceeded its deadline
    #[error("{stage} timed out after {after:?}")]
    TimedOut { stage: Stage, after: Duration },

    /// A boundary call was cancelled
    #[error("{0} was cancelled")]
    Cancelled(Stage),

    /// Another operation is in flight
    #[error("Another package operation is in progress")]
    Busy,

    /// Install requested without a selected package version
    #[error("No package version selected")]
    NoSelection,

    /// Version not in the resolved version list
    #[error("{version} is not a published version of {package}")]
    UnknownVersion { package: String, version: String },

    /// Empty package name selected
    #[error("Package name must not be empty")]
    EmptyPackageName,
}

impl InstallError {
    /// Classification shown to the user
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Index(e) if e.is_not_found() => ErrorKind::PackageNotFound,
            InstallError::Index(_) => ErrorKind::IndexUnavailable,
            InstallError::Fetch(FetchError::PackageNotFound(_)) => ErrorKind::PackageNotFound,
            InstallError::Fetch(e) if e.is_corrupt_archive() => ErrorKind::CorruptArchive,
            InstallError::Fetch(_) => ErrorKind::DownloadFailed,
            InstallError::Cache(_) => ErrorKind::CacheWriteFailed,
            InstallError::TimedOut { stage, .. } | InstallError::Cancelled(stage) => {
                stage_kind(*stage)
            }
            InstallError::Busy
            | InstallError::NoSelection
            | InstallError::UnknownVersion { .. }
            | InstallError::EmptyPackageName => ErrorKind::Rejected,
        }
    }

    /// Whether the failure came from a deadline or cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            InstallError::TimedOut { .. } | InstallError::Cancelled(_)
        )
    }
}

fn stage_kind(stage: Stage) -> ErrorKind {
    match stage {
        Stage::Search | Stage::Versions => ErrorKind::IndexUnavailable,
        Stage::Download => ErrorKind::DownloadFailed,
        Stage::CacheWrite => ErrorKind::CacheWriteFailed,
    }
}

/// Pipeline state of the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Searching,
    VersionSelecting,
    Downloading,
    /// Selecting assemblies and encoding the cache payload
    Integrating,
    /// Writing package files to the cache, then registering references
    CachePopulating,
    Done,
    Failed(ErrorKind),
}

impl PipelineState {
    /// Whether an operation is running in this state
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PipelineState::Searching
                | PipelineState::Downloading
                | PipelineState::Integrating
                | PipelineState::CachePopulating
        )
    }
}

/// External services the installer drives
#[derive(Clone)]
pub struct Collaborators {
    pub index: Arc<dyn PackageIndex>,
    pub source: Arc<dyn PackageSource>,
    pub references: Arc<dyn ReferenceSink>,
    pub cache: Arc<dyn CacheSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Collaborators {
    /// NuGet index and fetcher sharing one HTTP connection pool
    pub fn nuget(
        config: &InstallerConfig,
        references: Arc<dyn ReferenceSink>,
        cache: Arc<dyn CacheSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.http.request_timeout())
            .connect_timeout(config.http.connect_timeout())
            .user_agent(config.http.user_agent.clone())
            .build()?;

        let index = NuGetIndexClient::with_client(client.clone(), &config.index);
        let source =
            NuGetContentFetcher::with_client(client, &config.index, config.http.max_archive_size)
                .with_max_extracted_size(config.http.max_extracted_size);

        Ok(Self {
            index: Arc::new(index),
            source: Arc::new(source),
            references,
            cache,
            notifier,
        })
    }
}

/// Selection fields reset after each successful install
#[derive(Debug, Clone, Default)]
struct Selection {
    search_results: Vec<String>,
    package: Option<String>,
    versions: Vec<String>,
    version: Option<String>,
}

/// Point-in-time view of the installer, for rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub search_results: Vec<String>,
    pub selected_package: Option<String>,
    pub versions: Vec<String>,
    pub selected_version: Option<String>,
}

/// Outcome of a successful install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub identity: PackageIdentity,
    /// Assemblies handed to the reference sink
    pub assemblies: usize,
    /// Files written to the cache
    pub files: usize,
    pub archive_checksum: Option<String>,
}

/// Clears the in-flight flag when an operation ends or is dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Install orchestrator for one session
pub struct Installer {
    session: SessionId,
    collaborators: Collaborators,
    policy: CallPolicy,
    state: Mutex<PipelineState>,
    selection: Mutex<Selection>,
    busy: AtomicBool,
}

impl Installer {
    pub fn new(session: SessionId, collaborators: Collaborators, policy: CallPolicy) -> Self {
        Self {
            session,
            collaborators,
            policy,
            state: Mutex::new(PipelineState::Idle),
            selection: Mutex::new(Selection::default()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let state = self.state();
        let selection = self.selection.lock();

        PipelineSnapshot {
            state,
            search_results: selection.search_results.clone(),
            selected_package: selection.package.clone(),
            versions: selection.versions.clone(),
            selected_version: selection.version.clone(),
        }
    }

    /// Handle that aborts the boundary call in flight
    pub fn cancel_handle(&self) -> CancelHandle {
        self.policy.cancel_handle()
    }

    /// Query package names starting with `prefix`
    ///
    /// Clears any previous package selection and returns to `Idle` with the
    /// results populated.
    pub async fn search(&self, prefix: &str) -> Result<Vec<String>, InstallError> {
        let _guard = self.begin("search")?;
        self.set_state(PipelineState::Searching);

        let started = Instant::now();
        let index = Arc::clone(&self.collaborators.index);
        let result = self.guarded(Stage::Search, index.search_names(prefix)).await;

        match result {
            Ok(names) => {
                debug!(
                    prefix,
                    results = names.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "search finished"
                );

                *self.selection.lock() = Selection {
                    search_results: names.clone(),
                    ..Selection::default()
                };
                self.set_state(PipelineState::Idle);
                Ok(names)
            }
            Err(e) => {
                let message = format!("Package search failed: {}", e);
                Err(self.fail(e, message))
            }
        }
    }

    /// Select a package and load its versions, newest first
    ///
    /// The newest version becomes the selected version.
    pub async fn select_package(&self, name: &str) -> Result<Vec<String>, InstallError> {
        let _guard = self.begin("version lookup")?;

        let name = name.trim();
        if name.is_empty() {
            return Err(self.reject(InstallError::EmptyPackageName));
        }

        self.set_state(PipelineState::VersionSelecting);
        {
            let mut selection = self.selection.lock();
            selection.package = Some(name.to_string());
            selection.versions.clear();
            selection.version = None;
        }

        let started = Instant::now();
        let index = Arc::clone(&self.collaborators.index);
        let result = match self.guarded(Stage::Versions, index.list_versions(name)).await {
            Ok(versions) if versions.is_empty() => Err(InstallError::Index(
                IndexError::PackageNotFound(name.to_string()),
            )),
            other => other,
        };

        match result {
            Ok(versions) => {
                debug!(
                    package = name,
                    versions = versions.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "versions loaded"
                );

                let mut selection = self.selection.lock();
                selection.version = versions.first().cloned();
                selection.versions = versions.clone();
                Ok(versions)
            }
            Err(e) => {
                {
                    let mut selection = self.selection.lock();
                    selection.package = None;
                    selection.versions.clear();
                }
                let message = format!("Could not load versions for {}: {}", name, e);
                Err(self.fail(e, message))
            }
        }
    }

    /// Pick one of the loaded versions of the selected package
    pub fn select_version(&self, version: &str) -> Result<(), InstallError> {
        let _guard = self.begin("version selection")?;

        let state = self.state();
        let mut selection = self.selection.lock();
        let package = selection.package.clone();
        let package = match package {
            Some(package) if state == PipelineState::VersionSelecting => package,
            _ => {
                drop(selection);
                return Err(self.reject(InstallError::NoSelection));
            }
        };

        if !selection.versions.iter().any(|v| v == version) {
            drop(selection);
            return Err(self.reject(InstallError::UnknownVersion {
                package,
                version: version.to_string(),
            }));
        }

        selection.version = Some(version.to_string());
        Ok(())
    }

    /// Install the selected package version
    ///
    /// Download, cache write and reference registration happen in that order;
    /// nothing reaches the reference sink unless the cache accepted the files.
    pub async fn install(&self) -> Result<InstallReport, InstallError> {
        let _guard = self.begin("install")?;

        let identity = match self.selected_identity() {
            Some(identity) => identity,
            None => return Err(self.reject(InstallError::NoSelection)),
        };

        let pipeline_started = Instant::now();

        self.set_state(PipelineState::Downloading);
        let started = Instant::now();
        let source = Arc::clone(&self.collaborators.source);
        let contents = match self.guarded(Stage::Download, source.download(&identity)).await {
            Ok(contents) => contents,
            Err(e) => return Err(self.fail_install(&identity, e)),
        };
        debug!(
            package = %identity,
            files = contents.len(),
            bytes = contents.total_size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "download finished"
        );

        self.set_state(PipelineState::Integrating);
        let assemblies: Vec<Vec<u8>> = contents
            .assemblies()
            .map(|(_, bytes)| bytes.to_vec())
            .collect();
        let payload = CachePayload::from_contents(&contents);
        let files = payload.len();

        self.set_state(PipelineState::CachePopulating);
        let started = Instant::now();
        let cache = Arc::clone(&self.collaborators.cache);
        if let Err(e) = self
            .guarded(Stage::CacheWrite, cache.store(&self.session, payload))
            .await
        {
            return Err(self.fail_install(&identity, e));
        }
        debug!(
            package = %identity,
            files,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache populated"
        );

        let assembly_count = assemblies.len();
        self.collaborators.references.add_references(assemblies);

        info!(
            package = %identity,
            session = %self.session,
            assemblies = assembly_count,
            files,
            elapsed_ms = pipeline_started.elapsed().as_millis() as u64,
            "package installed"
        );

        self.set_state(PipelineState::Done);
        *self.selection.lock() = Selection::default();
        self.notify(
            Severity::Info,
            format!(
                "{} {} package is successfully installed.",
                identity.name(),
                identity.version()
            ),
        );

        Ok(InstallReport {
            archive_checksum: contents.archive_checksum().map(String::from),
            identity,
            assemblies: assembly_count,
            files,
        })
    }

    fn selected_identity(&self) -> Option<PackageIdentity> {
        if self.state() != PipelineState::VersionSelecting {
            return None;
        }

        let selection = self.selection.lock();
        match (&selection.package, &selection.version) {
            (Some(package), Some(version)) => Some(PackageIdentity::new(package, version)),
            _ => None,
        }
    }

    fn begin(&self, action: &str) -> Result<InFlight<'_>, InstallError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(action, "rejected: operation in flight");
            return Err(self.reject(InstallError::Busy));
        }

        self.policy.reset();
        Ok(InFlight(&self.busy))
    }

    async fn guarded<T, E, F>(&self, stage: Stage, fut: F) -> Result<T, InstallError>
    where
        F: Future<Output = Result<T, E>>,
        InstallError: From<E>,
    {
        match self.policy.run(fut).await {
            Ok(result) => result.map_err(InstallError::from),
            Err(Interrupted::TimedOut(after)) => Err(InstallError::TimedOut { stage, after }),
            Err(Interrupted::Cancelled) => Err(InstallError::Cancelled(stage)),
        }
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = self.state.lock();
        debug!(from = ?*current, to = ?state, "pipeline state");
        *current = state;
    }

    fn fail_install(&self, identity: &PackageIdentity, error: InstallError) -> InstallError {
        let message = format!("Failed to install {}: {}", identity, error);
        self.fail(error, message)
    }

    /// Halt in `Failed` and report the error once
    fn fail(&self, error: InstallError, message: String) -> InstallError {
        warn!(kind = %error.kind(), error = %error, "package operation failed");
        self.set_state(PipelineState::Failed(error.kind()));
        self.notify(Severity::Error, message);
        error
    }

    /// Report a refused request without changing the pipeline state
    fn reject(&self, error: InstallError) -> InstallError {
        self.notify(Severity::Warning, error.to_string());
        error
    }

    fn notify(&self, severity: Severity, message: String) {
        self.collaborators
            .notifier
            .notify(Notification::new(severity, message));
    }
}
