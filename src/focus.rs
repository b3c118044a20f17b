//! Focus log extraction.
//!
//! Condenses a merged trace into `focus_pipe.txt` with a two-stage grep
//! pipeline built on [`Pipeline`]: stage A selects lines (curated categories
//! in broad mode, everything in narrow mode), stage B drops known noise
//! paths, and stage B's output is redirected into the focus log.

use crate::error::PipelineError;
use crate::mode::TraceMode;
use crate::pipeline::Pipeline;
use crate::stage::CommandList;
use std::path::{Path, PathBuf};

/// File name of the focus log inside a run directory.
pub const FOCUS_LOG: &str = "focus_pipe.txt";

/// Syscall categories kept in broad mode: process lifecycle, descriptors and
/// I/O, working directory, process groups and signals.
pub const BROAD_INCLUDE: &str = concat!(
    r" (execve|pipe2?|dup2?|clone|fork|vfork|wait4|waitid|exit_group)\(",
    r"| (openat|close|fcntl)\(",
    r"| (read|write|readv|writev|pread64|pwrite64)\(",
    r"| (chdir|getcwd)\(",
    r"| (setpgid|setsid|tcsetpgrp|ioctl)\(",
    r"| (sigaction|rt_sigaction|rt_sigprocmask|kill)\(",
);

/// Paths that show up in every process start and say nothing about the pipeline.
pub const NOISE_EXCLUDE: &str = concat!(
    r"/etc/ld\.so\.cache|/usr/lib/|/lib/|locale-archive|/etc/locale",
    r"|/etc/nsswitch\.conf|/etc/passwd|/etc/group",
);

/// Pattern that matches every line; narrow capture is already restricted.
const PASS_THROUGH: &str = "^";

/// Status at or above which a grep stage is considered broken (2 = error).
const GREP_ERROR: i32 = 2;

/// The produced focus log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusLog {
    pub path: PathBuf,

    /// True if a filter stage failed, leaving the log empty or partial.
    pub degraded: bool,
}

/// Builds focus logs with a given grep binary.
#[derive(Debug, Clone)]
pub struct FocusFilter {
    grep: PathBuf,
}

impl FocusFilter {
    pub fn new(grep: impl Into<PathBuf>) -> Self {
        Self { grep: grep.into() }
    }

    /// The inclusion/exclusion pipeline for `merged` in `mode`.
    pub fn commands(&self, merged: &Path, mode: TraceMode) -> Result<CommandList, PipelineError> {
        let grep = self.grep.display().to_string();
        let merged = merged.display().to_string();

        let include = match mode {
            TraceMode::Broad => vec![grep.clone(), "-E".to_string(), BROAD_INCLUDE.to_string(), merged],
            TraceMode::Narrow => vec![grep.clone(), PASS_THROUGH.to_string(), merged],
        };
        let exclude = vec![grep, "-v".to_string(), "-E".to_string(), NOISE_EXCLUDE.to_string()];

        CommandList::new([include, exclude])
    }

    /// Write `<run_dir>/focus_pipe.txt` from the merged log.
    ///
    /// Without a merged log an empty focus log is written. Failures degrade
    /// the result and are never propagated.
    pub async fn filter(&self, run_dir: &Path, merged: Option<&Path>, mode: TraceMode) -> FocusLog {
        let path = run_dir.join(FOCUS_LOG);

        let Some(merged) = merged.filter(|m| m.is_file()) else {
            let degraded = !write_empty(&path);
            return FocusLog { path, degraded };
        };

        let result = match self.commands(merged, mode) {
            Ok(commands) => Pipeline::new(commands).redirect(&path).run().await,
            Err(e) => Err(e.into()),
        };
        let degraded = match result {
            Ok(report) => report
                .stages()
                .iter()
                .any(|stage| stage.failed_to_start() || stage.status() >= GREP_ERROR),
            Err(e) => {
                tracing::warn!(error = %e, "focus pipeline aborted");
                true
            }
        };

        if degraded {
            tracing::warn!(focus = %path.display(), "focus extraction degraded");
            if !path.exists() {
                write_empty(&path);
            }
        }

        FocusLog { path, degraded }
    }
}

/// Leave an empty focus log behind; false if even that fails.
fn write_empty(path: &Path) -> bool {
    match std::fs::write(path, b"") {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(focus = %path.display(), error = %e, "cannot write empty focus log");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GREP: &str = "/usr/bin/grep";

    const MERGED: &str = "\
101 10:00:00.000001 execve(\"/bin/echo\", [\"echo\", \"hi\"], 0x0 /* 1 var */) = 0
101 10:00:00.000002 openat(AT_FDCWD, \"/etc/ld.so.cache\", O_RDONLY|O_CLOEXEC) = 3</etc/ld.so.cache>
101 10:00:00.000003 mmap(NULL, 8192, PROT_READ, MAP_PRIVATE, 3</usr/lib/libc.so.6>, 0) = 0x7f
101 10:00:00.000004 brk(NULL) = 0x55
101 10:00:00.000005 write(1<pipe:[77]>, \"hi\\n\", 3) = 3
102 10:00:00.000006 dup2(3<pipe:[77]>, 0) = 0
";

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let merged = tmp.path().join("trace.txt");
        std::fs::write(&merged, MERGED).unwrap();
        (tmp, merged)
    }

    #[test]
    fn test_commands_shape() {
        let filter = FocusFilter::new(GREP);
        let list = filter
            .commands(Path::new("/r/trace.txt"), TraceMode::Broad)
            .unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.stages()[0].argv()[1], "-E");
        assert_eq!(list.stages()[0].argv()[3], "/r/trace.txt");
        assert_eq!(list.stages()[1].args(), &["-v", "-E", NOISE_EXCLUDE]);

        let list = filter
            .commands(Path::new("/r/trace.txt"), TraceMode::Narrow)
            .unwrap();
        assert_eq!(list.stages()[0].args(), &[PASS_THROUGH, "/r/trace.txt"]);
    }

    #[tokio::test]
    async fn test_no_merged_log_gives_empty_focus() {
        let tmp = TempDir::new().unwrap();
        let focus = FocusFilter::new(GREP)
            .filter(tmp.path(), None, TraceMode::Narrow)
            .await;

        assert!(!focus.degraded);
        assert_eq!(std::fs::read_to_string(&focus.path).unwrap(), "");
        assert!(focus.path.ends_with(FOCUS_LOG));
    }

    #[tokio::test]
    async fn test_unwritable_focus_log_degrades() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("missing-run");
        let focus = FocusFilter::new(GREP)
            .filter(&gone, None, TraceMode::Narrow)
            .await;

        assert!(focus.degraded);
        assert!(!focus.path.exists());
        assert!(!write_empty(&focus.path));
    }

    #[tokio::test]
    async fn test_narrow_removes_only_noise() {
        let (tmp, merged) = setup();
        let focus = FocusFilter::new(GREP)
            .filter(tmp.path(), Some(&merged), TraceMode::Narrow)
            .await;

        assert!(!focus.degraded);
        let text = std::fs::read_to_string(&focus.path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(text.contains(" execve("));
        assert!(text.contains(" brk("));
        assert!(text.contains(" write("));
        assert!(text.contains(" dup2("));
        assert!(!text.contains("ld.so.cache"));
        assert!(!text.contains("/usr/lib/"));
    }

    #[tokio::test]
    async fn test_broad_also_drops_uncurated() {
        let (tmp, merged) = setup();
        let focus = FocusFilter::new(GREP)
            .filter(tmp.path(), Some(&merged), TraceMode::Broad)
            .await;

        assert!(!focus.degraded);
        let text = std::fs::read_to_string(&focus.path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(!text.contains(" brk("));
        assert!(!text.contains(" mmap("));
        assert!(text.contains(" execve("));
        assert!(text.contains(" dup2("));
    }

    #[tokio::test]
    async fn test_missing_grep_degrades() {
        let (tmp, merged) = setup();
        let focus = FocusFilter::new("/nonexistent/grep")
            .filter(tmp.path(), Some(&merged), TraceMode::Narrow)
            .await;

        assert!(focus.degraded);
        assert!(focus.path.exists());
    }
}
