//! Reading engines and writing results.
//!
//! Inputs are memory-mapped. Outputs are written to a temporary file beside
//! the destination and renamed into place, so a failed write never leaves a
//! truncated executable behind.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};

/// Memory-maps an input file.
pub fn map_input(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|e| Error::FileOpen {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
        path: path.to_path_buf(),
        source: e,
    })?;

    debug!("Mapped {} ({} bytes)", path.display(), mmap.len());
    Ok(mmap)
}

/// Writes `data` to `path`, marking it executable when asked.
pub fn write_output(path: &Path, data: &[u8], executable: bool) -> Result<()> {
    let write_error = |e: std::io::Error| Error::FileWrite {
        path: path.to_path_buf(),
        source: e,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_error)?;

    let mut file = NamedTempFile::new_in(parent).map_err(write_error)?;
    file.write_all(data).map_err(write_error)?;
    file.flush().map_err(write_error)?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o755)).map_err(write_error)?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    file.persist(path).map_err(|e| write_error(e.error))?;
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.bin");
        write_output(&path, b"contents", false).unwrap();
        assert_eq!(&map_input(&path).unwrap()[..], b"contents");

        // replacing an existing file
        write_output(&path, b"new", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = map_input(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app");
        write_output(&path, b"\xCF\xFA\xED\xFE", true).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
