//! Log root resolution and per-session run directories.
//!
//! Each session writes only inside its own run directory, named
//! `<YYYYMMDD-HHMMSS>-<pid>`, so concurrent sessions need no locking.

use crate::error::LogRootError;
use chrono::{Local, NaiveDateTime};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Attempts at a `.N` suffix before giving up on a run directory name.
const MAX_SUFFIX: u32 = 64;

/// A writable directory holding run directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRoot {
    path: PathBuf,
}

impl LogRoot {
    /// Use the first candidate that exists (or can be created) and is writable.
    ///
    /// # Errors
    ///
    /// `LogRootError::Unwritable` if no candidate works.
    pub fn resolve(candidates: &[PathBuf]) -> Result<Self, LogRootError> {
        for (rank, candidate) in candidates.iter().enumerate() {
            match prepare(candidate) {
                Ok(()) => {
                    if rank > 0 {
                        tracing::warn!(root = %candidate.display(), "using fallback log root");
                    }
                    return Ok(Self {
                        path: candidate.clone(),
                    });
                }
                Err(e) => {
                    tracing::debug!(root = %candidate.display(), error = %e, "log root unusable");
                }
            }
        }

        Err(LogRootError::Unwritable {
            tried: candidates.to_vec(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the run directory for a session started now by this process.
    pub fn allocate_run(&self) -> Result<PathBuf, LogRootError> {
        self.allocate_run_at(Local::now().naive_local(), std::process::id())
    }

    /// Create the run directory for a session started at `at` by process `pid`.
    ///
    /// A name already taken (same second, same pid) gets a `.N` suffix.
    pub fn allocate_run_at(&self, at: NaiveDateTime, pid: u32) -> Result<PathBuf, LogRootError> {
        let base = run_dir_name(at, pid);

        for attempt in 0..=MAX_SUFFIX {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}.{}", base, attempt)
            };
            let path = self.path.join(name);

            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(LogRootError::RunDirectory { path, source }),
            }
        }

        let path = self.path.join(base);
        Err(LogRootError::RunDirectory {
            path,
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        })
    }
}

const RUN_DIR_STAMP: &str = "%Y%m%d-%H%M%S";
const RUN_DIR_STAMP_LEN: usize = "YYYYMMDD-HHMMSS".len();

/// `<YYYYMMDD-HHMMSS>-<pid>`
pub fn run_dir_name(at: NaiveDateTime, pid: u32) -> String {
    format!("{}-{}", at.format(RUN_DIR_STAMP), pid)
}

/// The session start encoded in a run directory's name, to the second.
///
/// `None` for directories not named by [`run_dir_name`].
pub fn run_started(run_dir: &Path) -> Option<NaiveDateTime> {
    let name = run_dir.file_name()?.to_str()?;
    let stamp = name.get(..RUN_DIR_STAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, RUN_DIR_STAMP).ok()
}

fn prepare(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    if !std::fs::metadata(dir)?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
    }
    check_writable(dir)
}

fn check_writable(dir: &Path) -> io::Result<()> {
    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let rc = unsafe { libc::access(c_path.as_ptr(), libc::W_OK | libc::X_OK) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
