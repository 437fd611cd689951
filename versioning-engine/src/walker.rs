//! Directory traversal for archive packing.
//!
//! Collects every regular file under a project directory together with its
//! path relative to the project root. Directories are only containers and
//! are never reported; archive entries recreate them implicitly.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file discovered under the project root.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Full path to the file.
    pub path: PathBuf,

    /// Path relative to the walk root; becomes the archive entry name.
    pub relative_path: PathBuf,

    /// File size in bytes.
    pub size: u64,
}

/// Walk `root` and collect all regular files, skipping anything excluded.
///
/// A file is excluded when any component of its relative path contains one
/// of the patterns, so `node_modules` prunes the whole subtree and `.env`
/// catches `.env.local` as well. Symlinks are not followed; a symlink to a
/// regular file is stored as that file's content, a symlink to a directory
/// or a broken link is skipped.
pub fn collect_files(root: &Path, excludes: &[String]) -> std::io::Result<Vec<FileEntry>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(std::io::Error::from)?;

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();

        if is_excluded(&relative_path, excludes) {
            continue;
        }

        // Resolve symlinks to the target's metadata; skip anything that is
        // not ultimately a regular file.
        let size = if entry.file_type().is_symlink() {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_file() => resolved.len(),
                _ => continue,
            }
        } else {
            entry.metadata().map_err(std::io::Error::from)?.len()
        };

        files.push(FileEntry {
            path,
            relative_path,
            size,
        });
    }

    Ok(files)
}

fn is_excluded(relative_path: &Path, excludes: &[String]) -> bool {
    if excludes.is_empty() {
        return false;
    }
    relative_path.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        excludes.iter().any(|pattern| name.contains(pattern.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let files = collect_files(temp_dir.path(), &[])?;
        assert_eq!(files.len(), 0);
        Ok(())
    }

    #[test]
    fn test_collect_nested_files() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"hello")?;
        fs::create_dir(temp_dir.path().join("b"))?;
        fs::write(temp_dir.path().join("b/c.txt"), b"world")?;

        let mut files = collect_files(temp_dir.path(), &[])?;
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].relative_path, PathBuf::from("a.txt"));
        assert_eq!(files[0].size, 5);
        assert_eq!(files[1].relative_path, PathBuf::from("b/c.txt"));
        Ok(())
    }

    #[test]
    fn test_excludes_prune_subtrees() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("keep.txt"), b"keep")?;
        fs::create_dir(temp_dir.path().join("node_modules"))?;
        fs::write(temp_dir.path().join("node_modules/dep.js"), b"junk")?;
        fs::write(temp_dir.path().join(".env.local"), b"SECRET=1")?;

        let excludes = vec!["node_modules".to_string(), ".env".to_string()];
        let files = collect_files(temp_dir.path(), &excludes)?;

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].relative_path, PathBuf::from("keep.txt"));
        Ok(())
    }

    #[test]
    fn test_empty_exclude_set_keeps_everything() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join(".git"))?;
        fs::write(temp_dir.path().join(".git/HEAD"), b"ref: refs/heads/main")?;
        fs::write(temp_dir.path().join("file.txt"), b"data")?;

        let files = collect_files(temp_dir.path(), &[])?;
        assert_eq!(files.len(), 2);
        Ok(())
    }
}
