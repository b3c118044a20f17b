//! Output redirection for the final stage.
//!
//! The target is opened in the orchestrator as an owned, close-on-exec
//! handle and then handed to the child as its standard output. The caller's
//! own descriptors are never touched: only the child's fd 1 is replaced, and
//! only between fork and exec.

use crate::error::RedirectError;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Mode bits requested for a newly created target; the process umask applies.
pub const REDIRECT_MODE: u32 = 0o666;

/// Open `path` for writing, creating it if absent and truncating it if present.
///
/// # Errors
///
/// - `RedirectError::EmptyPath` for an empty path
/// - `RedirectError::Open` if the file cannot be opened
pub fn open_truncating(path: &Path) -> Result<File, RedirectError> {
    if path.as_os_str().is_empty() {
        return Err(RedirectError::EmptyPath);
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(REDIRECT_MODE)
        .open(path)
        .map_err(|source| RedirectError::Open {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_empty_path_rejected() {
        let result = open_truncating(Path::new(""));
        assert!(matches!(result, Err(RedirectError::EmptyPath)));
    }

    #[test]
    fn test_creates_missing_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");

        let mut file = open_truncating(&target).unwrap();
        file.write_all(b"x").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"x");
    }

    #[test]
    fn test_truncates_existing_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("out.txt");
        std::fs::write(&target, "old content that is long").unwrap();

        let mut file = open_truncating(&target).unwrap();
        file.write_all(b"new").unwrap();
        drop(file);

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_missing_parent_directory() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("no/such/dir/out.txt");

        let result = open_truncating(&target);
        assert!(matches!(result, Err(RedirectError::Open { .. })));
    }
}
