//! Atomic file writes for journal snapshots
//!
//! Snapshots are written temp-file → fsync → rename so a crash mid-write
//! never leaves a torn snapshot behind for resume to trip over.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tempfile::NamedTempFile;

/// Atomically write `content` to `path`.
///
/// The temporary file is created in the target's directory so the final
/// rename stays on one filesystem.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created, the
/// temporary file cannot be written or synced, or the rename fails.
pub fn write_file_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("Failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(content.as_bytes())
        .context("Failed to write content to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .context("Failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .with_context(|| format!("Failed to rename temporary file into place: {path}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn writes_content_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/snapshot.json")).unwrap();

        write_file_atomic(&path, "{\"seq\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"seq\":1}");
    }

    #[test]
    fn overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("snapshot.json")).unwrap();

        write_file_atomic(&path, "first").unwrap();
        write_file_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
