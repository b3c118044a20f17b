//! Anonymous pipes with owned endpoints.
//!
//! Both ends are created close-on-exec, so neither survives into an exec'd
//! image unless it is explicitly bound as a stage's stdin or stdout. Each end
//! is an `OwnedFd`: the descriptor is closed when the handle is dropped, on
//! every exit path.

use crate::error::ExecError;
use std::os::fd::{FromRawFd, OwnedFd};

/// Read and write ends of one pipe.
#[derive(Debug)]
pub struct PipeEnds {
    /// Consumed by the downstream stage as its stdin.
    pub read: OwnedFd,
    /// Consumed by the upstream stage as its stdout.
    pub write: OwnedFd,
}

impl PipeEnds {
    /// Create a fresh close-on-exec pipe.
    ///
    /// # Errors
    ///
    /// `ExecError::PipeFailed` when the kernel refuses (descriptor or memory
    /// exhaustion). Never retried.
    pub fn new() -> Result<Self, ExecError> {
        let mut fds = [0 as libc::c_int; 2];
        create_cloexec(&mut fds).map_err(|e| ExecError::PipeFailed {
            reason: e.to_string(),
        })?;

        // SAFETY: both descriptors were just returned by the kernel and are
        // owned by nothing else.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { read, write })
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn create_cloexec(fds: &mut [libc::c_int; 2]) -> std::io::Result<()> {
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn create_cloexec(fds: &mut [libc::c_int; 2]) -> std::io::Result<()> {
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in fds.iter() {
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_ends_are_cloexec() {
        let pipe = PipeEnds::new().unwrap();
        for fd in [pipe.read.as_raw_fd(), pipe.write.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags >= 0);
            assert_ne!(flags & libc::FD_CLOEXEC, 0, "fd {} must be close-on-exec", fd);
        }
    }

    #[test]
    fn test_bytes_flow_and_eof_after_writer_drop() {
        let pipe = PipeEnds::new().unwrap();
        let mut writer = File::from(pipe.write);
        let mut reader = File::from(pipe.read);

        writer.write_all(b"hello\n").unwrap();
        drop(writer);

        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello\n");
    }
}
