//! Package types and operations

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::parser::PackageParser;
use crate::version::Version;

/// Grouping identity of a package: `(name, arch)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub arch: String,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: arch.into(),
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.arch)
    }
}

/// A dependency relation (provides/requires) as recorded in the header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Capability name
    pub name: String,

    /// Comparison flag in repodata spelling (`EQ`, `LT`, `GT`, `LE`, `GE`)
    pub flags: Option<String>,

    /// Version the flag compares against
    pub version: Option<Version>,
}

impl Relation {
    pub fn unversioned(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: None,
            version: None,
        }
    }
}

/// Header data extracted from a package file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageHeader {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub packager: Option<String>,
    /// Build time (Unix epoch)
    #[serde(default)]
    pub build_time: u64,
    /// Sum of the sizes of the files the package installs
    #[serde(default)]
    pub installed_size: u64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub provides: Vec<Relation>,
    #[serde(default)]
    pub requires: Vec<Relation>,
}

/// One package file, identified, versioned and checksummed.
///
/// Records are never mutated; a changed file is represented by scanning it
/// again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    pub arch: String,

    /// Where the package file lives (possibly in a parent repository)
    pub path: PathBuf,

    /// SHA256 checksum of the package file
    pub checksum: String,

    /// Size in bytes
    pub size: u64,

    pub summary: String,
    pub description: String,
    pub url: Option<String>,
    pub license: Option<String>,
    pub packager: Option<String>,
    pub build_time: u64,
    pub installed_size: u64,
    pub files: Vec<String>,
    pub provides: Vec<Relation>,
    pub requires: Vec<Relation>,
}

impl PackageRecord {
    /// Parse a package file and checksum it
    pub fn from_file(path: &Path, parser: &dyn PackageParser) -> Result<Self> {
        let header = parser.parse(path)?;
        let (checksum, size) = sha256_file(path)?;
        Ok(Self::from_header(header, path, checksum, size))
    }

    pub fn from_header(header: PackageHeader, path: &Path, checksum: String, size: u64) -> Self {
        Self {
            version: Version::new(header.epoch, header.version, header.release),
            name: header.name,
            arch: header.arch,
            path: path.to_path_buf(),
            checksum,
            size,
            summary: header.summary,
            description: header.description,
            url: header.url,
            license: header.license,
            packager: header.packager,
            build_time: header.build_time,
            installed_size: header.installed_size,
            files: header.files,
            provides: header.provides,
            requires: header.requires,
        }
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.name, &self.arch)
    }

    /// `(name, arch, version)`; two records with equal keys are the same
    /// package regardless of which repository they came from
    pub fn key(&self) -> (PackageIdentity, Version) {
        (self.identity(), self.version.clone())
    }

    /// File name of the package file
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}-{}.{}.rpm", self.name, self.version, self.arch))
    }

    /// Get the full `name-[E:]V-R.arch` string
    pub fn nevra(&self) -> String {
        format!("{}-{}.{}", self.name, self.version.evr(), self.arch)
    }
}

/// Selects packages by name, either exactly or with a regular expression
#[derive(Debug, Clone)]
pub enum PackageFilter {
    Exact(String),
    Regex(Regex),
}

impl PackageFilter {
    pub fn exact(name: impl Into<String>) -> Self {
        PackageFilter::Exact(name.into())
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(PackageFilter::Regex(Regex::new(pattern)?))
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            PackageFilter::Exact(expected) => expected == name,
            PackageFilter::Regex(re) => re.is_match(name),
        }
    }
}

/// SHA256 (hex) and size of a file
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_exact_and_regex() {
        let exact = PackageFilter::exact("jicmp");
        assert!(exact.matches("jicmp"));
        assert!(!exact.matches("jicmp6"));

        let anchored = PackageFilter::regex("^jicmp$").unwrap();
        assert!(anchored.matches("jicmp"));
        assert!(!anchored.matches("jicmp6"));

        let loose = PackageFilter::regex("jicmp").unwrap();
        assert!(loose.matches("jicmp6"));
    }

    #[test]
    fn test_invalid_regex() {
        assert!(PackageFilter::regex("(").is_err());
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"abc").unwrap();
        let (sum, size) = sha256_file(&path).unwrap();
        assert_eq!(size, 3);
        assert_eq!(
            sum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
