//! rpmrepo: maintain signed RPM repositories
//!
//! Keeps a directory of packages in a canonical layout, generates delta
//! packages towards the latest version of every package, and publishes
//! signed repository metadata. Repositories can inherit packages from parent
//! repositories, and meta-repositories group named sub-repositories.

pub mod cli;
pub mod config;
pub mod delta;
pub mod error;
pub mod fsutil;
pub mod index;
pub mod meta;
pub mod metadata;
pub mod package;
pub mod parser;
pub mod repository;
pub mod signing;
pub mod tree;
pub mod version;

#[cfg(test)]
mod testutil;

pub use error::{RepoError, Result};
pub use meta::MetaRepository;
pub use package::{PackageFilter, PackageRecord};
pub use repository::{Repository, Tools};
pub use version::Version;
