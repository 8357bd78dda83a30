//! Canonical repository layout
//!
//! ```text
//! <root>/rpms/<name>/<arch>/<file>.rpm
//! <root>/drpms/<delta>.drpm
//! <root>/repodata/repomd.xml (+ .asc, .key and the indexed documents)
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{RepoError, Result};
use crate::fsutil;
use crate::package::{sha256_file, PackageIdentity, PackageRecord};
use crate::parser::PackageParser;
use crate::version::Version;

pub const RPMS_DIR: &str = "rpms";
pub const DRPMS_DIR: &str = "drpms";
pub const REPODATA_DIR: &str = "repodata";

/// Package records grouped by `(name, arch)` and ordered by version
#[derive(Debug, Clone, Default)]
pub struct PackageGroups {
    groups: BTreeMap<PackageIdentity, BTreeMap<Version, PackageRecord>>,
}

impl PackageGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless one with the same `(name, arch, version)` is
    /// already present. Returns whether the record was inserted.
    pub fn insert(&mut self, record: PackageRecord) -> bool {
        let versions = self.groups.entry(record.identity()).or_default();
        if versions.contains_key(&record.version) {
            return false;
        }
        versions.insert(record.version.clone(), record);
        true
    }

    /// Add every record of `other` whose key is not present yet
    pub fn merge(&mut self, other: &PackageGroups) {
        for record in other.records() {
            self.insert(record.clone());
        }
    }

    pub fn contains(&self, identity: &PackageIdentity, version: &Version) -> bool {
        self.get(identity, version).is_some()
    }

    pub fn get(&self, identity: &PackageIdentity, version: &Version) -> Option<&PackageRecord> {
        self.groups.get(identity).and_then(|v| v.get(version))
    }

    /// Highest version of a group
    pub fn latest(&self, identity: &PackageIdentity) -> Option<&PackageRecord> {
        self.groups
            .get(identity)
            .and_then(|v| v.values().next_back())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PackageIdentity, &BTreeMap<Version, PackageRecord>)> {
        self.groups.iter()
    }

    /// All records, ordered by identity then version
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.groups.values().flat_map(|v| v.values())
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group records by identity; the first record wins for duplicate keys
pub fn group_by_identity(records: impl IntoIterator<Item = PackageRecord>) -> PackageGroups {
    let mut groups = PackageGroups::new();
    for record in records {
        groups.insert(record);
    }
    groups
}

/// Result of scanning the package tree
#[derive(Debug, Default)]
pub struct ScanResult {
    pub records: Vec<PackageRecord>,
    /// Files that could not be parsed, with the reason
    pub failures: Vec<(PathBuf, String)>,
}

/// Result of a normalize pass
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// `(from, to)` for every relocated file
    pub moved: Vec<(PathBuf, PathBuf)>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Layout operations on a repository root
#[derive(Clone)]
pub struct RepositoryTree {
    root: PathBuf,
    parser: Arc<dyn PackageParser>,
}

impl RepositoryTree {
    pub fn new(root: &Path, parser: Arc<dyn PackageParser>) -> Self {
        Self {
            root: root.to_path_buf(),
            parser,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rpms_dir(&self) -> PathBuf {
        self.root.join(RPMS_DIR)
    }

    pub fn drpms_dir(&self) -> PathBuf {
        self.root.join(DRPMS_DIR)
    }

    pub fn repodata_dir(&self) -> PathBuf {
        self.root.join(REPODATA_DIR)
    }

    /// Directory a package of this identity belongs in
    pub fn package_dir(&self, identity: &PackageIdentity) -> PathBuf {
        self.rpms_dir().join(&identity.name).join(&identity.arch)
    }

    /// Canonical location of a package file in this tree
    pub fn canonical_path(&self, record: &PackageRecord) -> PathBuf {
        self.package_dir(&record.identity()).join(record.file_name())
    }

    /// Root-relative location with `/` separators, as used in repodata.
    ///
    /// `None` for paths outside the root.
    pub fn location(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }

    /// Parse every package under `rpms/`
    pub fn scan(&self) -> Result<ScanResult> {
        let rpms = self.rpms_dir();
        if !rpms.is_dir() {
            return Ok(ScanResult::default());
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(&rpms).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_package_file(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        let parsed: Vec<_> = paths
            .into_par_iter()
            .map(|path| {
                let result = PackageRecord::from_file(&path, self.parser.as_ref());
                (path, result)
            })
            .collect();

        let mut result = ScanResult::default();
        for (path, parsed) in parsed {
            match parsed {
                Ok(record) => result.records.push(record),
                Err(e) => {
                    warn!("Skipping unreadable package {}: {}", path.display(), e);
                    result.failures.push((path, e.to_string()));
                }
            }
        }

        debug!(
            "Scanned {}: {} packages, {} failures",
            self.root.display(),
            result.records.len(),
            result.failures.len()
        );
        Ok(result)
    }

    /// Move stray package files into `rpms/<name>/<arch>/`.
    ///
    /// Files already in canonical position are not touched. `drpms/` and
    /// `repodata/` are never looked at.
    pub fn normalize(&self) -> Result<NormalizeReport> {
        let mut report = NormalizeReport::default();
        if !self.root.is_dir() {
            return Ok(report);
        }

        let root = self.root.clone();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| !is_generated_dir(&root, e.path()));

        let mut candidates = Vec::new();
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && is_package_file(entry.path()) {
                candidates.push(entry.into_path());
            }
        }

        let parsed: Vec<_> = candidates
            .into_par_iter()
            .map(|path| {
                let header = self.parser.parse(&path);
                (path, header)
            })
            .collect();

        for (path, header) in parsed {
            let header = match header {
                Ok(header) => header,
                Err(e) => {
                    warn!("Leaving unparsable file in place: {}: {}", path.display(), e);
                    report.failures.push((path, e.to_string()));
                    continue;
                }
            };

            let identity = PackageIdentity::new(header.name, header.arch);
            let file_name = match path.file_name() {
                Some(name) => name.to_owned(),
                None => continue,
            };
            let canonical = self.package_dir(&identity).join(file_name);
            if canonical == path {
                continue;
            }

            if canonical.exists() {
                if sha256_file(&canonical)?.0 == sha256_file(&path)?.0 {
                    debug!("Removing duplicate of {}: {}", canonical.display(), path.display());
                    fs::remove_file(&path)?;
                    continue;
                }
                warn!("Replacing {} with {}", canonical.display(), path.display());
            }

            fsutil::move_file(&path, &canonical)?;
            debug!("Moved {} -> {}", path.display(), canonical.display());
            report.moved.push((path, canonical));
        }

        if !report.moved.is_empty() {
            info!(
                "Normalized {} package(s) in {}",
                report.moved.len(),
                self.root.display()
            );
        }
        Ok(report)
    }

    /// Check that the root can be used as a repository directory
    pub fn check_root(root: &Path) -> Result<()> {
        if root.exists() {
            if !root.is_dir() {
                return Err(RepoError::layout(root, "not a directory"));
            }
            return Ok(());
        }

        // The nearest existing ancestor must be a directory for the root to be creatable
        match root.ancestors().skip(1).find(|a| a.exists()) {
            Some(ancestor) if !ancestor.is_dir() => Err(RepoError::layout(
                root,
                format!("{} is not a directory", ancestor.display()),
            )),
            _ => Ok(()),
        }
    }
}

fn is_package_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().map(|e| e == "rpm").unwrap_or(false)
}

fn is_generated_dir(root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(relative) => {
            let mut components = relative.components();
            matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(first)), None)
                    if first == DRPMS_DIR || first == REPODATA_DIR
            )
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_package, FakeParser};

    fn tree(root: &Path) -> RepositoryTree {
        RepositoryTree::new(root, Arc::new(FakeParser))
    }

    #[test]
    fn test_scan_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("rpms/jicmp/x86_64");
        write_package(&pkg_dir, "jicmp", "1.4.1", "1", "x86_64");
        fs::write(pkg_dir.join("broken.rpm"), b"garbage").unwrap();

        let result = tree(dir.path()).scan().unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.records[0].name, "jicmp");
    }

    #[test]
    fn test_normalize_moves_stray_files() {
        let dir = tempfile::tempdir().unwrap();
        let a1 = write_package(dir.path(), "jicmp", "1.4.1", "1", "x86_64");
        let b1 = write_package(&dir.path().join("x86_64"), "jicmp6", "1.4.1", "1", "x86_64");
        fs::create_dir_all(dir.path().join("drpms")).unwrap();
        let ignored = write_package(&dir.path().join("drpms"), "other", "1", "1", "noarch");

        let report = tree(dir.path()).normalize().unwrap();
        assert_eq!(report.moved.len(), 2);
        assert!(!a1.exists());
        assert!(!b1.exists());
        assert!(ignored.exists());
        assert!(dir
            .path()
            .join("rpms/jicmp/x86_64/jicmp-1.4.1-1.x86_64.rpm")
            .exists());
        assert!(dir
            .path()
            .join("rpms/jicmp6/x86_64/jicmp6-1.4.1-1.x86_64.rpm")
            .exists());
    }

    #[test]
    fn test_normalize_leaves_canonical_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = write_package(&dir.path().join("rpms/jicmp/x86_64"), "jicmp", "1.4.1", "1", "x86_64");
        let before = fs::metadata(&pkg).unwrap().modified().unwrap();

        let report = tree(dir.path()).normalize().unwrap();
        assert!(report.moved.is_empty());
        assert_eq!(fs::metadata(&pkg).unwrap().modified().unwrap(), before);
    }

    #[test]
    fn test_normalize_reports_unparsable_files() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.rpm");
        fs::write(&junk, b"not a package").unwrap();

        let report = tree(dir.path()).normalize().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(junk.exists());
    }

    #[test]
    fn test_group_by_identity_orders_versions() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("rpms/jicmp/x86_64");
        write_package(&pkg_dir, "jicmp", "2.0.0", "0.1", "x86_64");
        write_package(&pkg_dir, "jicmp", "1.4.1", "1", "x86_64");
        write_package(&pkg_dir, "jicmp", "1.4.5", "2", "x86_64");

        let groups = group_by_identity(tree(dir.path()).scan().unwrap().records);
        let identity = PackageIdentity::new("jicmp", "x86_64");
        let latest = groups.latest(&identity).unwrap();
        assert_eq!(latest.version.evr(), "2.0.0-0.1");

        let order: Vec<String> = groups.records().map(|r| r.version.evr()).collect();
        assert_eq!(order, vec!["1.4.1-1", "1.4.5-2", "2.0.0-0.1"]);
    }

    #[test]
    fn test_check_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        assert!(RepositoryTree::check_root(dir.path()).is_ok());
        assert!(RepositoryTree::check_root(&dir.path().join("missing/deeper")).is_ok());
        assert!(matches!(
            RepositoryTree::check_root(&file),
            Err(RepoError::Layout { .. })
        ));
        assert!(RepositoryTree::check_root(&file.join("child")).is_err());
    }

    #[test]
    fn test_location() {
        let dir = tempfile::tempdir().unwrap();
        let t = tree(dir.path());
        let path = dir.path().join("rpms/jicmp/x86_64/jicmp-1.rpm");
        assert_eq!(
            t.location(&path).as_deref(),
            Some("rpms/jicmp/x86_64/jicmp-1.rpm")
        );

        let outside = dir.path().parent().unwrap().join("elsewhere/jicmp-1.rpm");
        assert_eq!(t.location(&outside), None);
        assert_eq!(t.location(&dir.path().join("rpms/../../jicmp-1.rpm")), None);
    }
}
