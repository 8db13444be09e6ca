//! Crash-safe file replacement.
//!
//! Bytes are written to a process-unique temporary file next to the
//! destination, flushed to disk, and renamed over the destination. A rename
//! within one directory is atomic, so readers only ever see the complete old
//! file or the complete new one. A crash mid-write leaves at most a stray
//! `*.tmp.{pid}` file, which no reader looks at.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::StorageError;
use crate::paths::{ensure_parent, with_suffix};

/// Temporary path used while replacing `dest` from this process.
#[must_use]
pub fn temp_path(dest: &Path) -> PathBuf {
    with_suffix(dest, &format!(".tmp.{}", std::process::id()))
}

/// Atomically replaces `dest` with `bytes`.
///
/// # Errors
///
/// Returns an I/O error if the temporary file cannot be written or renamed.
/// The destination is left untouched in that case.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    ensure_parent(dest)?;
    let tmp = temp_path(dest);

    let result = write_then_rename(&tmp, dest, bytes);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp, dest)
}

/// Serializes `value` as JSON and atomically replaces `dest` with it.
///
/// # Errors
///
/// Returns [`StorageError::Json`] if serialization fails (nothing is written)
/// or [`StorageError::Io`] if the write fails.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    dest: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(dest, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_destination_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.json");

        write_atomic(&dest, b"first").unwrap();
        write_atomic(&dest, b"second").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"second");
        assert!(!temp_path(&dest).exists());
    }

    #[test]
    fn leftover_temp_file_does_not_affect_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.json");
        write_atomic(&dest, b"complete").unwrap();

        // a writer that crashed mid-way leaves only its temp file behind
        std::fs::write(with_suffix(&dest, ".tmp.99999"), b"trunc").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"complete");
    }

    #[test]
    fn failed_write_leaves_prior_contents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.json");
        write_atomic(&dest, b"prior").unwrap();

        // a directory squatting on the temp path makes the write fail
        std::fs::create_dir(temp_path(&dest)).unwrap();
        assert!(write_atomic(&dest, b"new").is_err());

        assert_eq!(std::fs::read(&dest).unwrap(), b"prior");
    }

    #[test]
    fn writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested/out.json");

        write_json_atomic(&dest, &vec![1, 2, 3]).unwrap();

        let back: Vec<i32> = serde_json::from_slice(&std::fs::read(&dest).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
