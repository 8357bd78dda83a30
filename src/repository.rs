//! Repositories and their composition
//!
//! A [`Repository`] is a directory in the canonical layout plus an ordered
//! list of parent repositories it inherits packages from. Parents are plain
//! values handed in at construction, so the inheritance graph is acyclic by
//! construction and evaluated lazily on every operation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::delta::{DeltaGenerator, MakeDeltaRpm};
use crate::error::{RepoError, Result};
use crate::fsutil;
use crate::index::{self, IndexReport};
use crate::metadata::{RepoMd, REPOMD_FILE};
use crate::package::{PackageFilter, PackageRecord};
use crate::parser::{PackageParser, RpmHeaderParser};
use crate::signing::RepoSigner;
use crate::tree::{NormalizeReport, PackageGroups, RepositoryTree, DRPMS_DIR, REPODATA_DIR, RPMS_DIR};

/// The external tools a repository delegates to
#[derive(Clone)]
pub struct Tools {
    pub parser: Arc<dyn PackageParser>,
    pub deltas: Arc<dyn DeltaGenerator>,
}

impl Tools {
    pub fn new(parser: Arc<dyn PackageParser>, deltas: Arc<dyn DeltaGenerator>) -> Self {
        Self { parser, deltas }
    }

    /// Native header parsing and `makedeltarpm` at `delta_tool`
    pub fn system(delta_tool: &Path) -> Self {
        Self::new(
            Arc::new(RpmHeaderParser),
            Arc::new(MakeDeltaRpm::new(delta_tool)),
        )
    }
}

/// A single package repository
pub struct Repository {
    tree: RepositoryTree,
    parents: Vec<Arc<Repository>>,
    tools: Tools,
}

impl Repository {
    /// Open a repository without parents
    pub fn open(root: &Path, tools: Tools) -> Result<Self> {
        Self::with_parents(root, Vec::new(), tools)
    }

    /// Open a repository inheriting from `parents`, earlier parents first.
    ///
    /// The root does not need to exist yet.
    pub fn with_parents(root: &Path, parents: Vec<Arc<Repository>>, tools: Tools) -> Result<Self> {
        RepositoryTree::check_root(root)?;
        Ok(Self {
            tree: RepositoryTree::new(root, tools.parser.clone()),
            parents,
            tools,
        })
    }

    pub fn root(&self) -> &Path {
        self.tree.root()
    }

    pub fn tree(&self) -> &RepositoryTree {
        &self.tree
    }

    pub fn parents(&self) -> &[Arc<Repository>] {
        &self.parents
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Whether the repository has parseable metadata
    pub fn is_valid(&self) -> bool {
        fs::read_to_string(self.tree.repodata_dir().join(REPOMD_FILE))
            .map(|content| RepoMd::from_xml(&content).is_ok())
            .unwrap_or(false)
    }

    /// Packages physically present in this repository
    pub fn packages(&self) -> Result<PackageGroups> {
        let scan = self.tree.scan()?;
        let mut groups = PackageGroups::new();
        for record in scan.records {
            groups.insert(record);
        }
        Ok(groups)
    }

    /// Own packages plus everything inherited from the parents.
    ///
    /// For equal `(name, arch, version)` the own record wins, then the
    /// earlier parent.
    pub fn effective_packages(&self) -> Result<PackageGroups> {
        self.effective_packages_with(&self.packages()?)
    }

    pub(crate) fn effective_packages_with(&self, own: &PackageGroups) -> Result<PackageGroups> {
        let mut effective = own.clone();
        for parent in &self.parents {
            effective.merge(&parent.effective_packages()?);
        }
        Ok(effective)
    }

    /// Copy packages into their canonical location, skipping any whose
    /// `(name, arch, version)` is already present. Returns the written paths.
    pub fn add_packages(&self, records: &[PackageRecord]) -> Result<Vec<PathBuf>> {
        let mut present = self.packages()?;
        let mut written = Vec::new();

        for record in records {
            if present.contains(&record.identity(), &record.version) {
                debug!("Already present, skipping {}", record.nevra());
                continue;
            }

            let dest = self.tree.canonical_path(record);
            fsutil::copy_atomic(&record.path, &dest)?;
            debug!("Added {} as {}", record.nevra(), dest.display());

            let mut added = record.clone();
            added.path = dest.clone();
            present.insert(added);
            written.push(dest);
        }

        if !written.is_empty() {
            info!("Added {} package(s) to {}", written.len(), self.root().display());
        }
        Ok(written)
    }

    /// Copy the effective packages of `source`, optionally only those whose
    /// name matches `filter`
    pub fn add_packages_from(
        &self,
        source: &Repository,
        filter: Option<&PackageFilter>,
    ) -> Result<Vec<PathBuf>> {
        let selected: Vec<PackageRecord> = source
            .effective_packages()?
            .records()
            .filter(|r| filter.map(|f| f.matches(&r.name)).unwrap_or(true))
            .cloned()
            .collect();
        self.add_packages(&selected)
    }

    pub fn normalize(&self) -> Result<NormalizeReport> {
        self.tree.normalize()
    }

    /// Bring layout, deltas and signed metadata up to date
    pub fn index(&self, signer: &dyn RepoSigner) -> Result<IndexReport> {
        index::run(self, signer)
    }

    /// Replace the contents of `target` with a copy of this repository
    pub fn clone_into(&self, target: &Path) -> Result<Repository> {
        RepositoryTree::check_root(target)?;
        if same_location(self.root(), target) {
            return Err(RepoError::layout(target, "cannot clone a repository into itself"));
        }
        fs::create_dir_all(target)?;

        let mut copied = 0;
        for dir in [RPMS_DIR, DRPMS_DIR, REPODATA_DIR] {
            let dest = target.join(dir);
            if dest.exists() {
                fs::remove_dir_all(&dest)?;
            }
            let src = self.root().join(dir);
            if src.is_dir() {
                copied += fsutil::copy_tree(&src, &dest)?;
            }
        }

        info!(
            "Cloned {} into {} ({} files)",
            self.root().display(),
            target.display(),
            copied
        );
        Repository::open(target, self.tools.clone())
    }
}

fn same_location(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
