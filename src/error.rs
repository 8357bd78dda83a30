//! Error types for rpmrepo

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for repository operations
#[derive(Error, Debug)]
pub enum RepoError {
    /// A file could not be read as a package
    #[error("Failed to parse package {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The delta generator failed for one (old, new) pair
    #[error("Failed to generate delta {} -> {}: {message}", old.display(), new.display())]
    Delta {
        old: PathBuf,
        new: PathBuf,
        message: String,
    },

    #[error("Signing failed: {0}")]
    Signing(String),

    /// The repository root cannot be used
    #[error("Unusable repository root {}: {message}", path.display())]
    Layout { path: PathBuf, message: String },

    #[error("Invalid repository metadata: {0}")]
    Metadata(String),

    #[error("Invalid package filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RepoError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn layout(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RepoError::Layout {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<walkdir::Error> for RepoError {
    fn from(err: walkdir::Error) -> Self {
        RepoError::Io(err.into())
    }
}

impl From<quick_xml::Error> for RepoError {
    fn from(err: quick_xml::Error) -> Self {
        RepoError::Metadata(err.to_string())
    }
}

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;
