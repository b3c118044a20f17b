//! Checks on the executable handed to a trace session.

use crate::error::TraceError;
use std::fs::Metadata;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolve a trace target the way `execvp` would.
///
/// A name without a `/` is looked up in each directory of `search_path`, in
/// order; the first executable match wins. Anything else goes through
/// [`check_executable`] as is.
///
/// # Errors
///
/// `TraceError::TargetRejected` if nothing suitable is found.
pub fn resolve_target(target: &Path, search_path: &str) -> Result<PathBuf, TraceError> {
    let name = target.as_os_str();
    if name.is_empty() || name.as_bytes().contains(&b'/') {
        return check_executable(target);
    }

    for dir in search_path.split(':').filter(|dir| !dir.is_empty()) {
        if let Ok(found) = check_executable(&Path::new(dir).join(target)) {
            tracing::debug!(target = %target.display(), found = %found.display(), "resolved target");
            return Ok(found);
        }
    }

    Err(TraceError::TargetRejected {
        path: target.display().to_string(),
        reason: format!("not found in {}", search_path),
    })
}

/// Resolve `path` to an absolute, canonical regular file the current user may execute.
///
/// Relative paths are resolved against the working directory, so the traced
/// invocation does not depend on its sanitized search path to find the target.
///
/// # Errors
///
/// `TraceError::TargetRejected` if the path is empty, missing, a directory,
/// not a regular file, or not executable.
pub fn check_executable(path: &Path) -> Result<PathBuf, TraceError> {
    let path_str = path.display().to_string();
    let reject = |reason: String| TraceError::TargetRejected {
        path: path_str.clone(),
        reason,
    };

    if path.as_os_str().is_empty() {
        return Err(reject("empty path".to_string()));
    }

    let canonical = std::fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => reject("not found".to_string()),
        _ => reject(e.to_string()),
    })?;
    let metadata = std::fs::metadata(&canonical).map_err(|e| reject(e.to_string()))?;

    if metadata.is_dir() {
        return Err(reject("is a directory".to_string()));
    }
    if !metadata.is_file() {
        return Err(reject("not a regular file".to_string()));
    }
    if !is_executable(&metadata) {
        return Err(reject("not executable".to_string()));
    }

    Ok(canonical)
}

fn is_executable(metadata: &Metadata) -> bool {
    let uid = unsafe { libc::geteuid() };
    permits_exec(
        metadata.permissions().mode(),
        metadata.uid(),
        metadata.gid(),
        uid,
        in_group,
    )
}

/// Execute permission by POSIX class selection: the owner bits alone decide
/// for the owner, the group bits alone for group members, the other bits for
/// everyone else. Root needs any one execute bit.
fn permits_exec(
    mode: u32,
    owner: u32,
    group: u32,
    uid: u32,
    is_member: impl Fn(u32) -> bool,
) -> bool {
    if uid == 0 {
        return mode & 0o111 != 0;
    }
    if uid == owner {
        return mode & 0o100 != 0;
    }
    if is_member(group) {
        return mode & 0o010 != 0;
    }
    mode & 0o001 != 0
}

/// Whether the effective group or a supplementary group is `gid`.
fn in_group(gid: u32) -> bool {
    if unsafe { libc::getegid() } == gid {
        return true;
    }

    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count <= 0 {
        return false;
    }
    let mut groups: Vec<libc::gid_t> = vec![0; count as usize];
    let filled = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    if filled < 0 {
        return false;
    }
    groups.truncate(filled as usize);
    groups.contains(&gid)
}
