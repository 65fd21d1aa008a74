//! NuGet package installer (nugetpm)

use anyhow::Context;
use clap::{Parser, Subcommand};
use nuget_pm::{
    logging, CallPolicy, Collaborators, ConsoleNotifier, DirectoryCache, Installer,
    InstallerConfig, ReferenceRegistry, SessionId,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nugetpm")]
#[command(about = "Install NuGet packages into a compilation session", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.nuget-pm/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session id scoping the package cache (generated when omitted)
    #[arg(long, global = true)]
    session: Option<SessionId>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search package names by prefix
    Search {
        /// Name prefix
        prefix: String,
    },
    /// List the versions of a package, newest first
    Versions {
        /// Package name
        name: String,
    },
    /// Download a package and add it to the session
    Install {
        /// Package name
        name: String,
        /// Version to install (newest when omitted)
        #[arg(long)]
        version: Option<String>,
    },
    /// List the package files cached for the session
    Cached,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<InstallerConfig> {
    if let Some(path) = path {
        return InstallerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }

    match InstallerConfig::default_path() {
        Some(path) if path.exists() => InstallerConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display())),
        _ => Ok(InstallerConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = load_config(cli.config.as_ref())?;
    let cache = Arc::new(DirectoryCache::new(config.cache.root_dir()));

    if let Commands::Cached = cli.command {
        let session = cli
            .session
            .context("`cached` needs --session to know which session to list")?;
        let payload = cache.load(&session).await?;
        for path in payload.paths() {
            println!("{}", path);
        }
        return Ok(());
    }

    let session = match cli.session {
        Some(session) => session,
        None => {
            let session = SessionId::generate();
            eprintln!("session: {}", session);
            session
        }
    };

    let references = Arc::new(ReferenceRegistry::new());
    let collaborators = Collaborators::nuget(
        &config,
        references.clone(),
        cache,
        Arc::new(ConsoleNotifier),
    )?;
    let installer = Installer::new(
        session,
        collaborators,
        CallPolicy::new(config.http.request_timeout()),
    );

    let cancel = installer.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Search { prefix } => {
            for name in installer.search(&prefix).await? {
                println!("{}", name);
            }
        }
        Commands::Versions { name } => {
            for version in installer.select_package(&name).await? {
                println!("{}", version);
            }
        }
        Commands::Install { name, version } => {
            installer.select_package(&name).await?;
            if let Some(version) = version {
                installer.select_version(&version)?;
            }

            let report = installer.install().await?;
            println!(
                "{} assemblies referenced, {} files cached ({} references in session)",
                report.assemblies,
                report.files,
                references.len()
            );
        }
        Commands::Cached => unreachable!("handled above"),
    }

    Ok(())
}
