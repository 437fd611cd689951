//! Archive integrity: SHA-256 digests and sidecar checksum files.
//!
//! Every archive gets a `{archive}.sha256` sidecar holding the lowercase
//! hex digest of its exact byte content, so verification never needs the
//! metadata log.

use crate::error::{EngineError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Extension appended to the archive filename for its checksum sidecar.
pub const SIDECAR_EXT: &str = "sha256";

/// Sidecar path for an archive: `demo_20250101_120000.zip.sha256`.
pub fn sidecar_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXT);
    PathBuf::from(name)
}

/// Compute the SHA-256 digest of a file, streaming.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Digest the archive and persist the sidecar. Returns the hex digest.
pub fn write_sidecar(archive_path: &Path) -> Result<String> {
    let digest = digest_file(archive_path)?;
    std::fs::write(sidecar_path(archive_path), &digest)?;
    Ok(digest)
}

/// Verify an archive against its sidecar.
///
/// A missing archive, a missing sidecar or a digest mismatch are all
/// corruption-kind errors; callers must never restore past them.
pub fn verify(archive_path: &Path) -> Result<()> {
    if !archive_path.is_file() {
        return Err(EngineError::MissingArchive {
            archive: archive_path.to_path_buf(),
        });
    }

    let sidecar = sidecar_path(archive_path);
    let expected = std::fs::read_to_string(&sidecar)
        .map_err(|_| EngineError::MissingSidecar {
            archive: archive_path.to_path_buf(),
        })?
        .trim()
        .to_ascii_lowercase();

    let actual = digest_file(archive_path)?;
    if actual != expected {
        return Err(EngineError::ChecksumMismatch {
            archive: archive_path.to_path_buf(),
            expected,
            actual,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_digest_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("data.bin");
        fs::write(&file, b"hello world").unwrap();

        let first = digest_file(&file).unwrap();
        let second = digest_file(&file).unwrap();
        assert_eq!(first, second);
        // Known SHA-256 of "hello world".
        assert_eq!(
            first,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_write_and_verify_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("archive.zip");
        fs::write(&file, b"archive bytes").unwrap();

        let digest = write_sidecar(&file).unwrap();
        assert_eq!(fs::read_to_string(sidecar_path(&file)).unwrap(), digest);
        verify(&file).unwrap();
    }

    #[test]
    fn test_verify_detects_byte_flip() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("archive.zip");
        fs::write(&file, b"archive bytes").unwrap();
        write_sidecar(&file).unwrap();

        let mut bytes = fs::read(&file).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&file, &bytes).unwrap();

        let err = verify(&file).unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_verify_missing_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("archive.zip");
        fs::write(&file, b"archive bytes").unwrap();

        let err = verify(&file).unwrap_err();
        assert!(matches!(err, EngineError::MissingSidecar { .. }));
    }

    #[test]
    fn test_verify_missing_archive() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("gone.zip");

        let err = verify(&file).unwrap_err();
        assert!(matches!(err, EngineError::MissingArchive { .. }));
    }

    #[test]
    fn test_verify_tolerates_whitespace_and_case_in_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("archive.zip");
        fs::write(&file, b"archive bytes").unwrap();

        let digest = digest_file(&file).unwrap().to_ascii_uppercase();
        fs::write(sidecar_path(&file), format!("{digest}\n")).unwrap();

        verify(&file).unwrap();
    }
}
