//! Crucible - a hot-swap host for versioned business-logic containers
//!
//! This is the main CLI entry point for Crucible.

use clap::{Parser, Subcommand};
use crucible::artifact::{ArtifactDescriptor, ReleaseCoordinate, RepositoryLoader};
use crucible::container::ContainerRegistry;
use crucible::error::Result;
use crucible::state::FileStateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Crucible - versioned business-logic container host
#[derive(Parser)]
#[command(name = "crucible")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Hosts hot-swappable business-logic containers", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Artifact repository root (defaults to <data-dir>/repository)
    #[arg(long, global = true)]
    repository: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish an artifact descriptor into the repository
    Publish {
        /// Descriptor file (JSON)
        file: PathBuf,
    },

    /// Create a container bound to an artifact coordinate
    Create {
        /// Container id
        id: String,
        /// Artifact coordinate (group:name:version)
        coordinate: String,
    },

    /// Hot-swap a container to a new artifact version
    Update {
        /// Container id
        id: String,
        /// Artifact coordinate (group:name:version)
        coordinate: String,
    },

    /// Dispose a container
    Dispose {
        /// Container id
        id: String,
    },

    /// Inspect a container
    Inspect {
        /// Container id
        id: String,
    },

    /// List containers
    #[command(name = "ls")]
    List {
        /// Only show container ids
        #[arg(short, long)]
        quiet: bool,
    },

    /// Remove disposed container tombstones
    Purge,

    /// Re-resolve runtimes for containers restored from the state snapshot
    Recover,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Get base path for crucible data
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("crucible")
    });
    let repository = cli
        .repository
        .unwrap_or_else(|| data_dir.join("repository"));

    let loader = Arc::new(RepositoryLoader::new(repository)?);
    let store = Arc::new(FileStateStore::new(data_dir.join("containers.json"))?);
    let registry = ContainerRegistry::open(loader.clone(), store)?;

    match cli.command {
        Commands::Publish { file } => {
            let bytes = std::fs::read(&file)?;
            let descriptor: ArtifactDescriptor = serde_json::from_slice(&bytes)?;
            let coordinate = loader.publish(&descriptor)?;
            println!("{}", coordinate);
        }

        Commands::Create { id, coordinate } => {
            let coordinate: ReleaseCoordinate = coordinate.parse()?;
            registry.create(&id, coordinate)?;
            println!("{}", id);
        }

        Commands::Update { id, coordinate } => {
            let coordinate: ReleaseCoordinate = coordinate.parse()?;
            registry.update(&id, coordinate)?;
            println!("{}", id);
        }

        Commands::Dispose { id } => {
            registry.dispose(&id)?;
            println!("{}", id);
        }

        Commands::Inspect { id } => {
            let record = registry.get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::List { quiet } => {
            let records = registry.list()?;

            if quiet {
                for record in records {
                    println!("{}", record.id);
                }
            } else {
                println!(
                    "{:<20} {:<40} {:<10} {:<20}",
                    "CONTAINER ID", "COORDINATE", "STATUS", "UPDATED"
                );
                for record in records {
                    println!(
                        "{:<20} {:<40} {:<10} {:<20}",
                        record.id,
                        record.coordinate.to_string(),
                        record.status.to_string(),
                        record.updated_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }

        Commands::Purge => {
            for id in registry.purge()? {
                println!("{}", id);
            }
        }

        Commands::Recover => {
            registry.recover()?;
        }
    }

    Ok(())
}
