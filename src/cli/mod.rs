//! Command-line interface for rpmrepo

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::config::Config;
use crate::meta::MetaRepository;
use crate::repository::{Repository, Tools};

mod add;
mod clone;
mod copy;
mod index;
mod keygen;
mod list;
mod normalize;

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize, update deltas and regenerate signed metadata
    Index {
        /// Repository directory
        path: PathBuf,

        /// Parent repository to inherit from (repeatable, earlier wins)
        #[arg(long = "parent")]
        parents: Vec<PathBuf>,

        /// Treat the path (and parents) as meta-repositories
        #[arg(long)]
        meta: bool,

        /// Signing key (default: from configuration)
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Move stray packages into the canonical layout
    Normalize {
        /// Repository directory
        path: PathBuf,

        /// Treat the path as a meta-repository
        #[arg(long)]
        meta: bool,
    },

    /// Add package files to a repository
    Add {
        /// Repository directory
        path: PathBuf,

        /// Package files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Add to this sub-repository of a meta-repository
        #[arg(long)]
        sub: Option<String>,
    },

    /// Copy packages from one repository into another
    Copy {
        /// Source repository
        source: PathBuf,

        /// Target repository
        target: PathBuf,

        /// Only packages with exactly this name
        #[arg(long, conflicts_with = "regex")]
        name: Option<String>,

        /// Only packages whose name matches this regular expression
        #[arg(long)]
        regex: Option<String>,
    },

    /// Replace a repository with a copy of another
    Clone {
        /// Source repository
        source: PathBuf,

        /// Target repository (its contents are replaced)
        target: PathBuf,

        /// Treat both paths as meta-repositories
        #[arg(long)]
        meta: bool,
    },

    /// List the packages in a repository
    List {
        /// Repository directory
        path: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Generate a new repository signing key
    Keygen {
        /// Your name
        #[arg(long)]
        name: String,

        /// Your email
        #[arg(long)]
        email: String,

        /// Output directory for keys
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Execute a CLI command
pub fn execute(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Index { path, parents, meta, key } => {
            index::run(&path, &parents, meta, key.as_deref(), config)
        }
        Commands::Normalize { path, meta } => normalize::run(&path, meta, config),
        Commands::Add { path, files, sub } => add::run(&path, &files, sub.as_deref(), config),
        Commands::Copy { source, target, name, regex } => {
            copy::run(&source, &target, name.as_deref(), regex.as_deref(), config)
        }
        Commands::Clone { source, target, meta } => clone::run(&source, &target, meta, config),
        Commands::List { path, json } => list::run(&path, json, config),
        Commands::Keygen { name, email, output } => {
            keygen::run(&name, &email, output.as_deref(), config)
        }
    }
}

fn tools(config: &Config) -> Tools {
    Tools::system(&config.deltas.tool)
}

fn open_repository(path: &Path, parents: &[PathBuf], config: &Config) -> Result<Repository> {
    let parents = parents
        .iter()
        .map(|p| open_repository(p, &[], config).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    Repository::with_parents(path, parents, tools(config))
        .with_context(|| format!("Failed to open repository: {}", path.display()))
}

fn open_meta(path: &Path, parents: &[PathBuf], config: &Config) -> Result<MetaRepository> {
    let parents = parents
        .iter()
        .map(|p| open_meta(p, &[], config).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;
    MetaRepository::with_parents(path, parents, tools(config))
        .and_then(|meta| meta.with_default_name(&config.meta.default_repository))
        .with_context(|| format!("Failed to open meta-repository: {}", path.display()))
}
