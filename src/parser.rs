//! Package header extraction
//!
//! The repository code only needs header data, never the payload. The
//! [`PackageParser`] trait is the seam; [`RpmHeaderParser`] reads real rpm
//! files with the `rpm` crate.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rpm::Package;
use tracing::debug;

use crate::error::{RepoError, Result};
use crate::package::{PackageHeader, Relation};
use crate::version::Version;

/// Extracts a [`PackageHeader`] from a package file
pub trait PackageParser: Send + Sync {
    fn parse(&self, path: &Path) -> Result<PackageHeader>;
}

/// Parser for rpm package files
#[derive(Debug, Default, Clone, Copy)]
pub struct RpmHeaderParser;

impl PackageParser for RpmHeaderParser {
    fn parse(&self, path: &Path) -> Result<PackageHeader> {
        debug!("Parsing RPM header: {}", path.display());

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let pkg = Package::parse(&mut reader).map_err(|e| RepoError::parse(path, e))?;
        let md = &pkg.metadata;

        let name = md.get_name().map_err(|e| RepoError::parse(path, e))?.to_string();
        let version = md
            .get_version()
            .map_err(|e| RepoError::parse(path, e))?
            .to_string();
        let release = md
            .get_release()
            .map_err(|e| RepoError::parse(path, e))?
            .to_string();
        // Source packages carry no arch tag
        let arch = md
            .get_arch()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "src".to_string());

        let mut files = Vec::new();
        let mut installed_size = 0u64;
        if let Ok(entries) = md.get_file_entries() {
            for entry in entries {
                installed_size += entry.size as u64;
                files.push(entry.path.to_string_lossy().to_string());
            }
        }

        Ok(PackageHeader {
            name,
            epoch: md.get_epoch().unwrap_or(0),
            version,
            release,
            arch,
            summary: md.get_summary().map(|s| s.to_string()).unwrap_or_default(),
            description: md
                .get_description()
                .map(|s| s.to_string())
                .unwrap_or_default(),
            url: md.get_url().ok().map(|s| s.to_string()),
            license: md.get_license().ok().map(|s| s.to_string()),
            packager: md.get_packager().ok().map(|s| s.to_string()),
            build_time: md.get_build_time().unwrap_or(0),
            installed_size,
            files,
            provides: md
                .get_provides()
                .map(|deps| deps.into_iter().map(relation).collect())
                .unwrap_or_default(),
            requires: md
                .get_requires()
                .map(|deps| {
                    deps.into_iter()
                        .filter(|d| !d.name.starts_with("rpmlib("))
                        .map(relation)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

fn relation(dep: rpm::Dependency) -> Relation {
    let flags = flags_to_repodata(dep.flags);
    if dep.version.is_empty() || flags.is_none() {
        return Relation::unversioned(dep.name);
    }
    Relation {
        name: dep.name,
        flags: flags.map(str::to_string),
        version: Some(Version::parse(&dep.version)),
    }
}

/// Convert rpm dependency flags to the comparison names used in repodata
fn flags_to_repodata(flags: rpm::DependencyFlags) -> Option<&'static str> {
    use rpm::DependencyFlags;

    if flags.contains(DependencyFlags::LESS) && flags.contains(DependencyFlags::EQUAL) {
        Some("LE")
    } else if flags.contains(DependencyFlags::GREATER) && flags.contains(DependencyFlags::EQUAL) {
        Some("GE")
    } else if flags.contains(DependencyFlags::LESS) {
        Some("LT")
    } else if flags.contains(DependencyFlags::GREATER) {
        Some("GT")
    } else if flags.contains(DependencyFlags::EQUAL) {
        Some("EQ")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_rpm() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.rpm");
        std::fs::write(&path, b"definitely not an rpm").unwrap();

        let err = RpmHeaderParser.parse(&path).unwrap_err();
        assert!(matches!(err, RepoError::Parse { .. }));
    }

    #[test]
    fn test_flags() {
        use rpm::DependencyFlags;
        assert_eq!(
            flags_to_repodata(DependencyFlags::GREATER | DependencyFlags::EQUAL),
            Some("GE")
        );
        assert_eq!(flags_to_repodata(DependencyFlags::EQUAL), Some("EQ"));
        assert_eq!(flags_to_repodata(DependencyFlags::ANY), None);
    }
}
