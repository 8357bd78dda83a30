//! Test doubles for the external package tools

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::delta::DeltaGenerator;
use crate::error::{RepoError, Result};
use crate::package::PackageHeader;
use crate::parser::PackageParser;
use crate::repository::Tools;
use crate::signing::{LoadedSigningKey, RepoSigner};

/// Reads package "files" that are TOML-encoded [`PackageHeader`]s
pub struct FakeParser;

impl PackageParser for FakeParser {
    fn parse(&self, path: &Path) -> Result<PackageHeader> {
        let content = fs::read_to_string(path).map_err(|e| RepoError::parse(path, e))?;
        toml::from_str(&content).map_err(|e| RepoError::parse(path, e))
    }
}

/// Produces a delta by concatenating both inputs, counting invocations
#[derive(Default)]
pub struct FakeDeltas {
    pub calls: AtomicUsize,
}

impl DeltaGenerator for FakeDeltas {
    fn make_delta(&self, old: &Path, new: &Path) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = b"DRPM\n".to_vec();
        out.extend(fs::read(old)?);
        out.extend(fs::read(new)?);
        Ok(out)
    }
}

/// Always fails
pub struct BrokenDeltas;

impl DeltaGenerator for BrokenDeltas {
    fn make_delta(&self, old: &Path, new: &Path) -> Result<Vec<u8>> {
        Err(RepoError::Delta {
            old: old.to_path_buf(),
            new: new.to_path_buf(),
            message: "tool exploded".to_string(),
        })
    }
}

/// A signer whose key cannot sign
pub struct BrokenSigner;

impl RepoSigner for BrokenSigner {
    fn key_fingerprint(&self) -> String {
        "BROKEN".to_string()
    }

    fn sign(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(RepoError::Signing("key revoked".to_string()))
    }

    fn export_public_key(&self) -> Result<Vec<u8>> {
        Err(RepoError::Signing("key revoked".to_string()))
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> Result<()> {
        Err(RepoError::Signing("key revoked".to_string()))
    }
}

pub fn tools() -> Tools {
    Tools::new(Arc::new(FakeParser), Arc::new(FakeDeltas::default()))
}

pub fn signer() -> LoadedSigningKey {
    LoadedSigningKey::generate("Test User", "test@example.org")
}

/// Write a fake package into `dir` and return its path
pub fn write_package(dir: &Path, name: &str, version: &str, release: &str, arch: &str) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}-{version}-{release}.{arch}.rpm"));
    let content = format!(
        r#"name = "{name}"
epoch = 0
version = "{version}"
release = "{release}"
arch = "{arch}"
summary = "{name} test package"
description = "Test package {name} {version}-{release}"
license = "GPL-2.0"
build_time = 1500000000
installed_size = 1024
files = ["/usr/lib/{name}/lib{name}.so", "/usr/share/doc/{name}/README"]

[[requires]]
name = "glibc"

[[provides]]
name = "{name}"
flags = "EQ"
version = {{ epoch = 0, version = "{version}", release = "{release}" }}
"#
    );
    fs::write(&path, content).unwrap();
    path
}

/// jicmp 1.4.1-1, 1.4.5-2 and 2.0.0-0.1 written to `dir`
pub fn write_jicmp_series(dir: &Path) -> [PathBuf; 3] {
    [
        write_package(dir, "jicmp", "1.4.1", "1", "x86_64"),
        write_package(dir, "jicmp", "1.4.5", "2", "x86_64"),
        write_package(dir, "jicmp", "2.0.0", "0.1", "x86_64"),
    ]
}

pub const A1: &str = "jicmp-1.4.1-1.x86_64.rpm";
pub const A2: &str = "jicmp-1.4.5-2.x86_64.rpm";
pub const A3: &str = "jicmp-2.0.0-0.1.x86_64.rpm";
