//! Directory tree helpers: recursive copy, removal, and content hashing.
//!
//! Snapshots and rollbacks are plain directory copies, so these helpers
//! preserve symlinks (virtualenvs are full of them) instead of following them.

use crate::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Recursively copy `src` into `dst`. `dst` must not exist yet.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());

        if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            // fs::copy carries permission bits along, which keeps scripts in bin/ executable
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_tree(src, dst)
    } else {
        fs::copy(src, dst)?;
        Ok(())
    }
}

/// Remove `path` whether it is a directory, a file, or absent.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Compute a SHA-256 digest over the whole tree rooted at `root`.
///
/// Relative paths, file contents, and symlink targets all feed the hash, in
/// sorted path order, so two trees with the same observable content produce
/// the same digest regardless of where they live on disk.
pub fn tree_digest(root: &Path) -> Result<String> {
    let mut entries = Vec::new();
    collect_entries(root, &mut entries)?;
    entries.sort();

    let mut hasher = Sha256::new();
    for path in entries {
        let relative = path.strip_prefix(root).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(b"\0");

        let meta = fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            hasher.update(b"L");
            hasher.update(fs::read_link(&path)?.to_string_lossy().as_bytes());
        } else if meta.is_dir() {
            hasher.update(b"D");
        } else {
            hasher.update(b"F");
            hasher.update(fs::read(&path)?);
        }
        hasher.update(b"\0");
    }

    let digest = hex::encode(hasher.finalize());
    debug!(root = ?root, digest = %&digest[..12], "computed tree digest");
    Ok(digest)
}

fn collect_entries(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        out.push(path.clone());
        if file_type.is_dir() {
            collect_entries(&path, out)?;
        }
    }
    Ok(())
}
