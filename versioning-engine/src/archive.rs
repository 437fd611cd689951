//! Lossless directory <-> ZIP archive conversion.
//!
//! `pack` walks a project directory and stores every regular file under its
//! relative path; `unpack` recreates the tree. Only the logical content
//! (paths + bytes) is guaranteed to round-trip; entry timestamps inside the
//! archive may differ between runs.

use crate::error::{EngineError, Result};
use crate::walker::{collect_files, FileEntry};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Result of packing a directory.
#[derive(Debug, Clone, Copy)]
pub struct PackStats {
    /// Number of regular files stored.
    pub file_count: usize,

    /// Size of the finished archive in bytes.
    pub archive_size: u64,
}

/// Pack all regular files under `source_dir` into a ZIP archive at
/// `archive_path`, excluding paths matched by `excludes`.
///
/// Blocking; run under `spawn_blocking` in async contexts. Cancellation is
/// checked between file entries so large projects abort promptly.
pub fn pack(
    source_dir: &Path,
    archive_path: &Path,
    excludes: &[String],
    cancel: &CancellationToken,
) -> Result<PackStats> {
    let files = collect_files(source_dir, excludes)?;

    let out = File::create(archive_path)?;
    let mut zip = ZipWriter::new(BufWriter::new(out));

    let mut file_count = 0usize;
    for entry in &files {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        append_entry(&mut zip, entry)?;
        file_count += 1;
    }

    let mut out = zip.finish()?;
    out.flush()?;

    let archive_size = std::fs::metadata(archive_path)?.len();
    debug!(
        "Packed {} into {} ({} files, {} bytes)",
        source_dir.display(),
        archive_path.display(),
        file_count,
        archive_size
    );

    Ok(PackStats {
        file_count,
        archive_size,
    })
}

fn append_entry(zip: &mut ZipWriter<BufWriter<File>>, entry: &FileEntry) -> Result<()> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(entry.size >= u32::MAX as u64);

    zip.start_file(entry_name(&entry.relative_path), options)?;

    let mut input = BufReader::new(File::open(&entry.path)?);
    std::io::copy(&mut input, zip)?;
    Ok(())
}

/// Archive entry names always use forward slashes.
fn entry_name(relative_path: &Path) -> String {
    relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract every entry of the archive at `archive_path` into `dest_dir`,
/// recreating subdirectories. `dest_dir` must already exist.
///
/// Entries whose resolved path would escape `dest_dir` are rejected; a
/// crafted archive must never write outside the extraction root.
pub fn unpack(archive_path: &Path, dest_dir: &Path, cancel: &CancellationToken) -> Result<()> {
    let mut archive = ZipArchive::new(BufReader::new(File::open(archive_path)?))?;

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let mut file = archive.by_index(i)?;
        let relative = file
            .enclosed_name()
            .ok_or_else(|| EngineError::UnsafeEntryPath(file.name().to_string()))?;
        let out_path = dest_dir.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(File::create(&out_path)?);
        std::io::copy(&mut file, &mut out)?;
        out.flush()?;
    }

    debug!(
        "Unpacked {} into {} ({} entries)",
        archive_path.display(),
        dest_dir.display(),
        archive.len()
    );

    Ok(())
}
