//! tachi-bridge command line
//!
//! Offline inspection of extension packages plus repository management. Loading
//! sources needs a host runtime and is only available through the library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tachi_bridge::core::config::{Config, GlobalArgs};
use tachi_bridge::core::{JsonFileStore, Logger, ReqwestHttpClient};
use tachi_bridge::extension::desktop::convert_apk;
use tachi_bridge::extension::repository::{fetch_all, RepositoryDescriptor, RepositoryStore};
use tachi_bridge::extension::{archive, manifest, metadata, Dex2JarCommand, PackageValidator, ValidationOutcome};

#[derive(Debug, Parser)]
#[command(name = "tachi-bridge", version, about = "Tachiyomi/Mihon extension loader toolkit")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether an APK is a loadable extension
    Validate { apk: PathBuf },

    /// Print the metadata read from an APK
    Inspect {
        apk: PathBuf,

        /// Dump the decoded AndroidManifest.xml instead
        #[arg(long)]
        xml: bool,
    },

    /// Convert an APK's dex to a jar for desktop runtimes
    Convert {
        apk: PathBuf,

        /// Output jar, defaults to the APK path with a .jar extension
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Manage extension repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// List extensions offered by enabled repositories
    Available {
        /// Only show extensions for this language
        #[arg(long)]
        lang: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Subcommand)]
enum RepoAction {
    List,
    Add {
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    Remove {
        url: String,
    },
    Enable {
        url: String,
    },
    Disable {
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.global) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!(version = tachi_bridge::VERSION, "Starting tachi-bridge");

    match cli.command {
        Command::Validate { apk } => validate(&config, apk).await,
        Command::Inspect { apk, xml } => inspect(apk, xml).await,
        Command::Convert { apk, out } => convert(&config, apk, out).await,
        Command::Repo { action } => repo(&config, action),
        Command::Available { lang } => available(&config, lang).await,
        Command::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn validate(config: &Config, apk: PathBuf) -> Result<()> {
    let validator = PackageValidator::new(config.compatibility);
    let outcome = tokio::task::spawn_blocking(move || validator.validate(&apk))
        .await
        .context("Validation task failed")?;

    println!("{}", outcome);
    if let ValidationOutcome::Valid { .. } = outcome {
        Ok(())
    } else {
        anyhow::bail!("package is not loadable")
    }
}

async fn inspect(apk: PathBuf, xml: bool) -> Result<()> {
    let output = tokio::task::spawn_blocking(move || -> Result<String> {
        if xml {
            let mut zip = archive::open(&apk)?;
            let raw = archive::read_entry(&mut zip, archive::MANIFEST_ENTRY)?;
            Ok(manifest::decode(&raw)?.to_xml()?)
        } else {
            let metadata = metadata::extract(&apk)?;
            Ok(serde_json::to_string_pretty(&metadata)?)
        }
    })
    .await
    .context("Inspection task failed")??;

    println!("{}", output);
    Ok(())
}

async fn convert(config: &Config, apk: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let output = out.unwrap_or_else(|| apk.with_extension("jar"));
    let converter = Dex2JarCommand::from_config(&config.runtime);

    let merged = convert_apk(&converter, &apk, &output)
        .await
        .with_context(|| format!("Failed to convert {}", apk.display()))?;

    println!("{} ({} assets merged)", output.display(), merged);
    Ok(())
}

fn repository_store(config: &Config) -> Result<RepositoryStore> {
    let store = JsonFileStore::open(config.storage.preferences_file())?;
    Ok(RepositoryStore::new(Arc::new(store)))
}

fn repo(config: &Config, action: RepoAction) -> Result<()> {
    let store = repository_store(config)?;

    match action {
        RepoAction::List => {
            for repo in store.list() {
                let marker = if repo.enabled { "*" } else { " " };
                println!("{} {:<20} {}", marker, repo.name, repo.base_url);
            }
        }
        RepoAction::Add { url, name } => {
            let name = name.unwrap_or_else(|| url.clone());
            let descriptor = RepositoryDescriptor::new(name, &url)?;
            if !store.add(descriptor)? {
                println!("Repository already configured: {}", url);
            }
        }
        RepoAction::Remove { url } => {
            if !store.remove(&url)? {
                anyhow::bail!("no repository with URL {}", url);
            }
        }
        RepoAction::Enable { url } => set_enabled(&store, &url, true)?,
        RepoAction::Disable { url } => set_enabled(&store, &url, false)?,
    }

    Ok(())
}

fn set_enabled(store: &RepositoryStore, url: &str, enabled: bool) -> Result<()> {
    if !store.set_enabled(url, enabled)? {
        anyhow::bail!("no repository with URL {}", url);
    }
    Ok(())
}

async fn available(config: &Config, lang: Option<String>) -> Result<()> {
    let store = repository_store(config)?;
    let http = ReqwestHttpClient::new(&config.http)?;

    let listings = fetch_all(&http, &store.enabled()).await;
    for listing in listings
        .iter()
        .filter(|l| lang.as_deref().map_or(true, |lang| l.lang == lang))
    {
        println!(
            "{:<48} {:<10} {:<6} {}{}",
            listing.package_name,
            listing.version_name,
            listing.lang,
            listing.name,
            if listing.is_nsfw { " (18+)" } else { "" }
        );
    }

    Ok(())
}
