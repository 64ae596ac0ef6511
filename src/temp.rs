//! Temporary file management module
//!
//! Downloaded archives and extracted subtitle entries live in temporary files
//! until they are installed at their destination. The guards delete them on
//! drop, on success and on failure alike.

use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Guard for temporary resources that automatically cleans up on drop
#[derive(Debug)]
pub(crate) enum TempGuard {
    /// Temporary file that will be deleted when dropped
    File(PathBuf),
}

impl TempGuard {
    /// Get the path to the temporary resource
    pub(crate) fn path(&self) -> &Path {
        match self {
            TempGuard::File(path) => path,
        }
    }

    /// Copies the temporary file to `destination`, creating missing parent
    /// directories
    ///
    /// The temporary file itself stays owned by the guard.
    pub(crate) fn copy_to(&self, destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::copy(self.path(), destination)?;
        Ok(())
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        match self {
            TempGuard::File(path) => {
                if let Err(e) = fs::remove_file(&*path) {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
    }
}

impl Deref for TempGuard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}

/// Creates a temporary file and returns a guard that will clean it up on drop
///
/// The file is created in the system's temporary directory with a unique name
/// generated using ULID.
///
/// # Examples
///
/// ```ignore
/// let archive = create_temp_file("subtitle_download", "tmp").unwrap();
/// std::fs::write(&*archive, bytes)?;
/// // The file is deleted when `archive` goes out of scope
/// ```
pub(crate) fn create_temp_file(prefix: &str, extension: &str) -> io::Result<TempGuard> {
    let filename = format!("{}_{}.{}", prefix, ulid::Ulid::new(), extension);
    let path = std::env::temp_dir().join(filename);

    File::create(&path)?;

    Ok(TempGuard::File(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temp_file() {
        let temp = create_temp_file("subtitle", "srt").unwrap();
        let path = temp.path().to_path_buf();

        assert!(path.is_file());
        assert!(path.is_absolute());

        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(filename.starts_with("subtitle_"));
        assert!(filename.ends_with(".srt"));

        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_temp_files_are_unique() {
        let first = create_temp_file("subtitle", "srt").unwrap();
        let second = create_temp_file("subtitle", "srt").unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_copy_to_creates_parents_and_keeps_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("Show").join("Season 1").join("ep.en.srt");

        let temp = create_temp_file("subtitle", "srt").unwrap();
        fs::write(&*temp, "1\n00:00:01,000 --> 00:00:02,000\nHi\n").unwrap();
        temp.copy_to(&destination).unwrap();

        let source = temp.path().to_path_buf();
        drop(temp);

        assert!(!source.exists());
        assert!(fs::read_to_string(&destination).unwrap().contains("Hi"));
    }
}
