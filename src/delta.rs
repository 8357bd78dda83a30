//! Delta package (drpm) maintenance
//!
//! For every `(name, arch)` group with more than one version, the latest
//! version is the delta target and every older version gets a delta to it.
//! Deltas are retained purely by their target: a delta whose target is still
//! the latest package stays even when its source package is long gone.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{RepoError, Result};
use crate::fsutil;
use crate::package::{sha256_file, PackageIdentity};
use crate::tree::PackageGroups;
use crate::version::Version;

/// File extension of delta packages
pub const DELTA_EXTENSION: &str = "drpm";

/// Produces the bytes of a delta package turning `old` into `new`
pub trait DeltaGenerator: Send + Sync {
    fn make_delta(&self, old: &Path, new: &Path) -> Result<Vec<u8>>;
}

/// Runs `makedeltarpm` (from deltarpm) to produce deltas
#[derive(Debug, Clone)]
pub struct MakeDeltaRpm {
    tool: PathBuf,
}

impl MakeDeltaRpm {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Default for MakeDeltaRpm {
    fn default() -> Self {
        Self::new("makedeltarpm")
    }
}

impl DeltaGenerator for MakeDeltaRpm {
    fn make_delta(&self, old: &Path, new: &Path) -> Result<Vec<u8>> {
        let fail = |message: String| RepoError::Delta {
            old: old.to_path_buf(),
            new: new.to_path_buf(),
            message,
        };

        let scratch = tempfile::tempdir()?;
        let out = scratch.path().join("delta.drpm");

        let output = Command::new(&self.tool)
            .arg(old)
            .arg(new)
            .arg(&out)
            .output()
            .map_err(|e| fail(format!("failed to run {}: {}", self.tool.display(), e)))?;

        if !output.status.success() {
            return Err(fail(format!(
                "{} exited with {}: {}",
                self.tool.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(fs::read(&out)?)
    }
}

/// A required delta: `(name, arch, old -> new)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaDescriptor {
    pub name: String,
    pub arch: String,
    pub old: Version,
    pub new: Version,
}

impl DeltaDescriptor {
    pub fn new(identity: &PackageIdentity, old: &Version, new: &Version) -> Self {
        Self {
            name: identity.name.clone(),
            arch: identity.arch.clone(),
            old: old.clone(),
            new: new.clone(),
        }
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.name, &self.arch)
    }

    /// `<name>-<oldEVR>_<newEVR>.<arch>.drpm`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}_{}.{}.{}",
            self.name,
            self.old.evr(),
            self.new.evr(),
            self.arch,
            DELTA_EXTENSION
        )
    }
}

/// A delta file name decoded back into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaFileName {
    pub name: String,
    pub arch: String,
    /// `<oldEVR>_<newEVR>`
    evrs: String,
}

impl DeltaFileName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(&format!(".{}", DELTA_EXTENSION))?;
        let (stem, arch) = stem.rsplit_once('.')?;

        // name-V1-R1_V2-R2: versions and releases never contain '-'
        let parts: Vec<&str> = stem.rsplitn(4, '-').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) || !parts[1].contains('_') {
            return None;
        }
        let name = parts[3];

        Some(Self {
            name: name.to_string(),
            arch: arch.to_string(),
            evrs: stem[name.len() + 1..].to_string(),
        })
    }

    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(&self.name, &self.arch)
    }

    /// The source version, if this delta targets `target`
    pub fn old_version_for(&self, target: &Version) -> Option<Version> {
        let suffix = format!("_{}", target.evr());
        self.evrs
            .strip_suffix(&suffix)
            .filter(|old| !old.is_empty())
            .map(Version::parse)
    }
}

/// One delta to build, with the package files on both sides
#[derive(Debug, Clone)]
pub struct DeltaJob {
    pub descriptor: DeltaDescriptor,
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

/// A delta present on disk that targets a current latest package
#[derive(Debug, Clone)]
pub struct PublishedDelta {
    pub file_name: String,
    pub descriptor: DeltaDescriptor,
    pub size: u64,
    pub checksum: String,
}

/// Result of [`DeltaPlan::materialize`]
#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub created: Vec<PathBuf>,
    /// Deltas that were already present
    pub existing: usize,
    /// `(delta file name, error)` for every pair the generator failed on
    pub failures: Vec<(String, String)>,
}

enum Outcome {
    Created(PathBuf),
    Existing,
    Failed(String, String),
}

/// The deltas an effective package set requires
#[derive(Debug, Default)]
pub struct DeltaPlan {
    jobs: Vec<DeltaJob>,
    latest: BTreeMap<PackageIdentity, Version>,
}

impl DeltaPlan {
    pub fn new(groups: &PackageGroups) -> Self {
        let mut plan = DeltaPlan::default();

        for (identity, versions) in groups.iter() {
            let Some((latest_version, latest)) = versions.iter().next_back() else {
                continue;
            };
            plan.latest.insert(identity.clone(), latest_version.clone());

            for (version, record) in versions.iter().filter(|(v, _)| *v < latest_version) {
                plan.jobs.push(DeltaJob {
                    descriptor: DeltaDescriptor::new(identity, version, latest_version),
                    old_path: record.path.clone(),
                    new_path: latest.path.clone(),
                });
            }
        }

        plan
    }

    pub fn jobs(&self) -> &[DeltaJob] {
        &self.jobs
    }

    pub fn required(&self) -> impl Iterator<Item = &DeltaDescriptor> {
        self.jobs.iter().map(|j| &j.descriptor)
    }

    /// Latest version of a group, i.e. the only valid delta target
    pub fn target(&self, identity: &PackageIdentity) -> Option<&Version> {
        self.latest.get(identity)
    }

    /// Delete every delta whose target is not the latest version of its group
    pub fn prune(&self, drpm_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();

        for (path, file_name) in delta_files(drpm_dir)? {
            let keep = DeltaFileName::parse(&file_name)
                .and_then(|parsed| {
                    let target = self.latest.get(&parsed.identity())?;
                    parsed.old_version_for(target)
                })
                .is_some();

            if !keep {
                debug!("Pruning stale delta {}", file_name);
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }

        if !removed.is_empty() {
            info!("Pruned {} stale delta(s) from {}", removed.len(), drpm_dir.display());
        }
        Ok(removed)
    }

    /// Generate every required delta that does not exist yet.
    ///
    /// Generator failures are reported, not propagated; the missing delta is
    /// retried on the next run.
    pub fn materialize(
        &self,
        drpm_dir: &Path,
        generator: &dyn DeltaGenerator,
    ) -> Result<MaterializeReport> {
        if !self.jobs.is_empty() {
            fs::create_dir_all(drpm_dir)?;
        }

        let outcomes: Vec<Outcome> = self
            .jobs
            .par_iter()
            .map(|job| {
                let file_name = job.descriptor.file_name();
                let dest = drpm_dir.join(&file_name);
                if dest.exists() {
                    return Outcome::Existing;
                }

                let written = generator
                    .make_delta(&job.old_path, &job.new_path)
                    .and_then(|bytes| fsutil::write_atomic(&dest, &bytes).map_err(RepoError::from));

                match written {
                    Ok(()) => {
                        debug!("Created delta {}", file_name);
                        Outcome::Created(dest)
                    }
                    Err(e) => {
                        warn!("Skipping delta {}: {}", file_name, e);
                        Outcome::Failed(file_name, e.to_string())
                    }
                }
            })
            .collect();

        let mut report = MaterializeReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Created(path) => report.created.push(path),
                Outcome::Existing => report.existing += 1,
                Outcome::Failed(name, error) => report.failures.push((name, error)),
            }
        }

        if !report.created.is_empty() {
            info!("Generated {} delta(s) in {}", report.created.len(), drpm_dir.display());
        }
        Ok(report)
    }

    /// Deltas on disk that target a current latest package, sorted by file name
    pub fn published(&self, drpm_dir: &Path) -> Result<Vec<PublishedDelta>> {
        let candidates: Vec<(PathBuf, DeltaDescriptor, String)> = delta_files(drpm_dir)?
            .into_iter()
            .filter_map(|(path, file_name)| {
                let parsed = DeltaFileName::parse(&file_name)?;
                let target = self.latest.get(&parsed.identity())?;
                let old = parsed.old_version_for(target)?;
                let descriptor = DeltaDescriptor::new(&parsed.identity(), &old, target);
                Some((path, descriptor, file_name))
            })
            .collect();

        let mut published = candidates
            .into_par_iter()
            .map(|(path, descriptor, file_name)| -> Result<PublishedDelta> {
                let (checksum, size) = sha256_file(&path)?;
                Ok(PublishedDelta {
                    file_name,
                    descriptor,
                    size,
                    checksum,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        published.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(published)
    }
}

/// `(path, file name)` of every `*.drpm` directly in `drpm_dir`
fn delta_files(drpm_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    if !drpm_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(drpm_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file()
            || path.extension().map(|e| e != DELTA_EXTENSION).unwrap_or(true)
        {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        files.push((path, file_name));
    }
    files.sort();
    Ok(files)
}
