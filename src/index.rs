//! Repository indexing
//!
//! Runs the full maintenance pass over one repository: normalize the layout,
//! promote inherited packages, maintain deltas, and regenerate the signed
//! metadata when (and only when) its inputs changed.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::delta::{DeltaPlan, MaterializeReport, PublishedDelta};
use crate::error::{RepoError, Result};
use crate::fsutil;
use crate::metadata::{
    self, IndexedPackage, RepoMd, PUBLIC_KEY_FILE, REPOMD_FILE, SIGNATURE_FILE,
};
use crate::repository::Repository;
use crate::signing::RepoSigner;
use crate::tree::{NormalizeReport, PackageGroups};

/// Outcome of indexing a repository
#[derive(Debug, Default)]
pub struct IndexReport {
    pub normalized: NormalizeReport,
    /// Package files that could not be read while scanning
    pub scan_failures: Vec<(PathBuf, String)>,
    /// Inherited packages copied into this repository
    pub promoted: Vec<PathBuf>,
    /// Stale deltas removed
    pub pruned: Vec<PathBuf>,
    pub deltas: MaterializeReport,
    /// Packages listed in the metadata
    pub packages: usize,
    /// Whether the metadata was written (false when it was already current)
    pub regenerated: bool,
}

/// One package's contribution to the staleness fingerprint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PackageEntry {
    location: String,
    checksum: String,
    size: u64,
}

/// Fingerprint of everything the generated metadata depends on
fn fingerprint(packages: &[PackageEntry], deltas: &[PublishedDelta], key_fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    for entry in packages {
        hasher.update(format!("P {} {} {}\n", entry.location, entry.checksum, entry.size));
    }
    for delta in deltas {
        hasher.update(format!("D {} {} {}\n", delta.file_name, delta.size, delta.checksum));
    }
    hasher.update(format!("K {}\n", key_fingerprint));
    hex::encode(hasher.finalize())
}

/// Whether the metadata in `repodata` was generated from `revision`, is
/// intact, and carries a signature by `signer` over the manifest on disk
fn is_current(root: &Path, repodata: &Path, revision: &str, signer: &dyn RepoSigner) -> bool {
    let Ok(content) = fs::read_to_string(repodata.join(REPOMD_FILE)) else {
        return false;
    };
    let Ok(repomd) = RepoMd::from_xml(&content) else {
        debug!("Existing {} does not parse, regenerating", REPOMD_FILE);
        return false;
    };
    if repomd.revision != revision {
        return false;
    }

    let documents_intact = repomd.data.iter().all(|data| {
        match fs::metadata(root.join(&data.location.href)) {
            Ok(meta) => data.size.map(|size| size == meta.len()).unwrap_or(true),
            Err(_) => false,
        }
    });
    if !documents_intact {
        return false;
    }

    let (Ok(signature), Ok(public_key)) = (
        fs::read(repodata.join(SIGNATURE_FILE)),
        fs::read(repodata.join(PUBLIC_KEY_FILE)),
    ) else {
        return false;
    };
    if signer.export_public_key().ok().as_deref() != Some(public_key.as_slice()) {
        debug!("Published key differs from the signing key, regenerating");
        return false;
    }
    if let Err(e) = signer.verify(content.as_bytes(), &signature) {
        debug!("Existing signature does not match {}: {}", REPOMD_FILE, e);
        return false;
    }
    true
}

/// Copy the latest version of every inherited group into the repository
fn promote(
    repo: &Repository,
    own: &mut PackageGroups,
    effective: &PackageGroups,
) -> Result<Vec<PathBuf>> {
    let mut promoted = Vec::new();

    for (identity, _) in effective.iter() {
        let Some(latest) = effective.latest(identity) else {
            continue;
        };
        if own.contains(identity, &latest.version) {
            continue;
        }

        let dest = repo.tree().canonical_path(latest);
        fsutil::copy_atomic(&latest.path, &dest)?;
        debug!("Promoted {} into {}", latest.nevra(), dest.display());

        let mut record = latest.clone();
        record.path = dest.clone();
        own.insert(record);
        promoted.push(dest);
    }

    if !promoted.is_empty() {
        info!(
            "Promoted {} inherited package(s) into {}",
            promoted.len(),
            repo.root().display()
        );
    }
    Ok(promoted)
}

/// Remove repodata documents the current manifest no longer references
fn remove_unreferenced(repodata: &Path, referenced: &BTreeSet<String>) -> Result<()> {
    for entry in fs::read_dir(repodata)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_file() || !name.ends_with(".xml.gz") || referenced.contains(&name) {
            continue;
        }
        debug!("Removing old metadata {}", name);
        fs::remove_file(entry.path())?;
    }
    Ok(())
}

pub(crate) fn run(repo: &Repository, signer: &dyn RepoSigner) -> Result<IndexReport> {
    let tree = repo.tree();
    info!("Indexing repository {}", tree.root().display());

    fs::create_dir_all(tree.root())?;
    let mut report = IndexReport {
        normalized: tree.normalize()?,
        ..Default::default()
    };

    let scan = tree.scan()?;
    report.scan_failures = scan.failures;
    let mut own = PackageGroups::new();
    for record in scan.records {
        own.insert(record);
    }

    let inherited = repo.effective_packages_with(&own)?;
    report.promoted = promote(repo, &mut own, &inherited)?;

    // Promoted records now live here and take precedence over the parents' copies
    let mut effective = own.clone();
    effective.merge(&inherited);

    let drpms = tree.drpms_dir();
    let plan = DeltaPlan::new(&effective);
    report.pruned = plan.prune(&drpms)?;
    report.deltas = plan.materialize(&drpms, repo.tools().deltas.as_ref())?;
    let published = plan.published(&drpms)?;

    let indexed: Vec<IndexedPackage<'_>> = own
        .records()
        .map(|record| {
            let location = tree.location(&record.path).ok_or_else(|| {
                RepoError::layout(&record.path, "package is outside the repository")
            })?;
            Ok(IndexedPackage { record, location })
        })
        .collect::<Result<_>>()?;
    report.packages = indexed.len();

    let mut entries: Vec<PackageEntry> = indexed
        .iter()
        .map(|pkg| PackageEntry {
            location: pkg.location.clone(),
            checksum: pkg.record.checksum.clone(),
            size: pkg.record.size,
        })
        .collect();
    entries.sort();
    let revision = fingerprint(&entries, &published, &signer.key_fingerprint());

    let repodata = tree.repodata_dir();
    if is_current(tree.root(), &repodata, &revision, signer) {
        info!("Metadata for {} is up to date", tree.root().display());
        return Ok(report);
    }

    let mut documents = metadata::package_documents(&indexed)?;
    documents.push(metadata::delta_document(&published)?);

    let timestamp = chrono::Utc::now().timestamp();
    let repomd = RepoMd {
        revision,
        data: documents.iter().map(|d| d.manifest_entry(timestamp)).collect(),
    };
    let manifest = repomd.to_xml()?;

    // Nothing canonical is written until the manifest is signed
    let signature = signer.sign(manifest.as_bytes())?;
    let public_key = signer.export_public_key()?;

    let mut referenced = BTreeSet::new();
    for document in &documents {
        let file_name = document.file_name();
        fsutil::write_atomic(&repodata.join(&file_name), &document.compressed)?;
        referenced.insert(file_name);
    }
    // The manifest goes last: until it lands, the previous manifest stays
    // and its revision no longer matches, so a partial write is redone
    fsutil::write_atomic(&repodata.join(PUBLIC_KEY_FILE), &public_key)?;
    fsutil::write_atomic(&repodata.join(SIGNATURE_FILE), &signature)?;
    fsutil::write_atomic(&repodata.join(REPOMD_FILE), manifest.as_bytes())?;
    remove_unreferenced(&repodata, &referenced)?;

    report.regenerated = true;
    info!(
        "Wrote metadata for {} package(s) and {} delta(s) to {}",
        report.packages,
        published.len(),
        repodata.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::signer;

    fn entry(location: &str) -> PackageEntry {
        PackageEntry {
            location: location.to_string(),
            checksum: "abc".to_string(),
            size: 1,
        }
    }

    #[test]
    fn test_fingerprint_depends_on_inputs() {
        let packages = vec![entry("rpms/a/x86_64/a.rpm")];
        let base = fingerprint(&packages, &[], "KEY1");

        assert_eq!(base, fingerprint(&packages, &[], "KEY1"));
        assert_ne!(base, fingerprint(&packages, &[], "KEY2"));
        assert_ne!(base, fingerprint(&[], &[], "KEY1"));
        assert_ne!(
            base,
            fingerprint(&[entry("rpms/b/x86_64/b.rpm")], &[], "KEY1")
        );
    }

    #[test]
    fn test_missing_manifest_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let repodata = dir.path().join("repodata");
        let signer = signer();
        assert!(!is_current(dir.path(), &repodata, "anything", &signer));

        fs::create_dir_all(&repodata).unwrap();
        fs::write(repodata.join(REPOMD_FILE), "<garbage").unwrap();
        assert!(!is_current(dir.path(), &repodata, "anything", &signer));
    }

    #[test]
    fn test_manifest_signed_by_other_key_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let repodata = dir.path().join("repodata");
        fs::create_dir_all(&repodata).unwrap();

        let manifest = RepoMd {
            revision: "abc".to_string(),
            data: Vec::new(),
        }
        .to_xml()
        .unwrap();
        let other = signer();
        fs::write(repodata.join(REPOMD_FILE), &manifest).unwrap();
        fs::write(repodata.join(SIGNATURE_FILE), other.sign(manifest.as_bytes()).unwrap()).unwrap();
        fs::write(repodata.join(PUBLIC_KEY_FILE), other.export_public_key().unwrap()).unwrap();
        assert!(is_current(dir.path(), &repodata, "abc", &other));

        let ours = signer();
        assert!(!is_current(dir.path(), &repodata, "abc", &ours));

        // Right key, signature over a different manifest
        fs::write(repodata.join(SIGNATURE_FILE), other.sign(b"<repomd/>").unwrap()).unwrap();
        assert!(!is_current(dir.path(), &repodata, "abc", &other));
    }
}
