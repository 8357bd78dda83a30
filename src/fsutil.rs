//! Atomic file writes
//!
//! Every canonical file is written to a temporary file in its destination
//! directory and renamed into place. A dropped temporary file is deleted, so
//! a failed write never leaves anything under the canonical name.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

fn temp_in(dir: &Path) -> io::Result<NamedTempFile> {
    fs::create_dir_all(dir)?;
    tempfile::Builder::new().prefix(".rpmrepo-").tempfile_in(dir)
}

fn commit(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    tmp.as_file().sync_all()?;

    // Temp files are created 0600
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Write `contents` to `path` atomically
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = temp_in(dir)?;
    tmp.write_all(contents)?;
    commit(tmp, path)
}

/// Copy `src` to `dst` atomically, creating parent directories
pub fn copy_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    let dir = dst.parent().unwrap_or(Path::new("."));
    let mut tmp = temp_in(dir)?;
    let mut input = File::open(src)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    commit(tmp, dst)
}

/// Move a file, falling back to copy + delete across filesystems
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(dir) = dst.parent() {
        fs::create_dir_all(dir)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            copy_atomic(src, dst)?;
            fs::remove_file(src)
        }
    }
}

/// Recursively copy a directory tree, overwriting existing files
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            copy_atomic(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("file.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_copy_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/one"), b"1").unwrap();
        fs::write(src.join("two"), b"2").unwrap();

        let dst = dir.path().join("dst");
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("two"), b"old").unwrap();

        assert_eq!(copy_tree(&src, &dst).unwrap(), 2);
        assert_eq!(fs::read(dst.join("a/b/one")).unwrap(), b"1");
        assert_eq!(fs::read(dst.join("two")).unwrap(), b"2");
    }
}
