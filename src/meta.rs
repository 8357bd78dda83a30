//! Meta-repositories
//!
//! A meta-repository is a directory of named sub-repositories
//! (`<root>/<name>/rpms/...`). Sub-repositories are opened lazily; a name
//! resolves to the same [`Repository`] for the lifetime of the
//! meta-repository. A sub-repository inherits from the same-named
//! sub-repositories of the parent meta-repositories.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::{RepoError, Result};
use crate::index::IndexReport;
use crate::package::{PackageFilter, PackageRecord};
use crate::repository::{Repository, Tools};
use crate::signing::RepoSigner;
use crate::tree::{NormalizeReport, RepositoryTree, DRPMS_DIR, REPODATA_DIR, RPMS_DIR};

/// Name of the sub-repository every meta-repository has
pub const DEFAULT_REPOSITORY: &str = "common";

pub struct MetaRepository {
    root: PathBuf,
    default_name: String,
    parents: Vec<Arc<MetaRepository>>,
    tools: Tools,
    repositories: Mutex<BTreeMap<String, Arc<Repository>>>,
}

impl MetaRepository {
    pub fn open(root: &Path, tools: Tools) -> Result<Self> {
        Self::with_parents(root, Vec::new(), tools)
    }

    pub fn with_parents(root: &Path, parents: Vec<Arc<MetaRepository>>, tools: Tools) -> Result<Self> {
        RepositoryTree::check_root(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            default_name: DEFAULT_REPOSITORY.to_string(),
            parents,
            tools,
            repositories: Mutex::new(BTreeMap::new()),
        })
    }

    /// Use `name` instead of `common` as the default sub-repository
    pub fn with_default_name(mut self, name: &str) -> Result<Self> {
        check_name(&self.root, name)?;
        self.default_name = name.to_string();
        Ok(self)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// The sub-repository called `name`, opening it on first use
    pub fn repository(&self, name: &str) -> Result<Arc<Repository>> {
        check_name(&self.root, name)?;

        let mut repositories = self
            .repositories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(repo) = repositories.get(name) {
            return Ok(Arc::clone(repo));
        }

        let parents = self
            .parents
            .iter()
            .map(|parent| parent.repository(name))
            .collect::<Result<Vec<_>>>()?;
        let repo = Arc::new(Repository::with_parents(
            &self.root.join(name),
            parents,
            self.tools.clone(),
        )?);
        repositories.insert(name.to_string(), Arc::clone(&repo));
        Ok(repo)
    }

    /// The default sub-repository
    pub fn default_repository(&self) -> Result<Arc<Repository>> {
        self.repository(&self.default_name)
    }

    /// Every known sub-repository name: the default, the ones opened so far
    /// and the directories present on disk
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        names.insert(self.default_name.clone());
        names.extend(
            self.repositories
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .keys()
                .cloned(),
        );

        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type()?.is_dir() && !name.starts_with('.') {
                    names.insert(name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Whether every known sub-repository has valid metadata
    pub fn is_valid(&self) -> bool {
        let Ok(names) = self.names() else {
            return false;
        };
        names.iter().all(|name| {
            self.repository(name)
                .map(|repo| repo.is_valid())
                .unwrap_or(false)
        })
    }

    pub fn add_packages(&self, name: &str, records: &[PackageRecord]) -> Result<Vec<PathBuf>> {
        self.repository(name)?.add_packages(records)
    }

    pub fn add_packages_from(
        &self,
        name: &str,
        source: &Repository,
        filter: Option<&PackageFilter>,
    ) -> Result<Vec<PathBuf>> {
        self.repository(name)?.add_packages_from(source, filter)
    }

    /// Copy every sub-repository of `other` into the same-named one here
    pub fn merge_from(&self, other: &MetaRepository) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for name in other.names()? {
            let source = other.repository(&name)?;
            written.extend(self.repository(&name)?.add_packages_from(&source, None)?);
        }
        Ok(written)
    }

    /// Index every sub-repository independently
    pub fn index(&self, signer: &dyn RepoSigner) -> Result<BTreeMap<String, IndexReport>> {
        let mut reports = BTreeMap::new();
        for name in self.names()? {
            let report = self.repository(&name)?.index(signer)?;
            reports.insert(name, report);
        }
        info!("Indexed {} sub-repositories in {}", reports.len(), self.root.display());
        Ok(reports)
    }

    pub fn normalize(&self) -> Result<BTreeMap<String, NormalizeReport>> {
        let mut reports = BTreeMap::new();
        for name in self.names()? {
            reports.insert(name.clone(), self.repository(&name)?.normalize()?);
        }
        Ok(reports)
    }

    /// Replace the contents of `target` with a copy of this meta-repository.
    ///
    /// Sub-repositories of the target that do not exist here are emptied.
    pub fn clone_into(&self, target: &Path) -> Result<MetaRepository> {
        RepositoryTree::check_root(target)?;
        let names = self.names()?;

        for name in &names {
            Repository::clone_into(&*self.repository(name)?, &target.join(name))?;
        }

        if target.is_dir() {
            for entry in fs::read_dir(target)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !entry.file_type()?.is_dir() || names.contains(&name) {
                    continue;
                }
                for dir in [RPMS_DIR, DRPMS_DIR, REPODATA_DIR] {
                    let stale = entry.path().join(dir);
                    if stale.is_dir() {
                        fs::remove_dir_all(&stale)?;
                    }
                }
            }
        }

        info!("Cloned {} into {}", self.root.display(), target.display());
        let clone = MetaRepository::open(target, self.tools.clone())?;
        clone.with_default_name(&self.default_name)
    }
}

/// A sub-repository name must be a single plain path component
fn check_name(root: &Path, name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(RepoError::layout(
            root.join(name),
            format!("invalid sub-repository name {:?}", name),
        )),
    }
}
