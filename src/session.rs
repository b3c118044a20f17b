//! Traced execution of a one-shot invocation.
//!
//! A session runs `<target> <line>` under the syscall tracer inside a fresh
//! run directory, then merges the per-process segments and extracts the
//! focus log. The reported status is always the tracer's own: merge and focus
//! problems only degrade the logs.
//!
//! Run directory layout:
//!
//! ```text
//! <root>/<YYYYMMDD-HHMMSS>-<pid>/
//!     meta.txt          provenance
//!     trace_all.<pid>   one raw segment per traced process
//!     trace.txt         merged segments, root excluded
//!     focus_pipe.txt    condensed view
//! ```

use crate::config::TraceConfig;
use crate::env_policy::EnvPolicy;
use crate::error::{ExecError, TraceError};
use crate::file_check::resolve_target;
use crate::focus::{FocusFilter, FocusLog};
use crate::log_root::LogRoot;
use crate::merge::{merge, SEGMENT_PREFIX};
use crate::metadata::TraceMetadata;
use crate::mode::TraceMode;
use crate::pipeline::{block_on, Pipeline};
use crate::stage::CommandList;
use std::path::{Path, PathBuf};

/// Result of one traced invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRun {
    /// The tracer's translated exit status.
    pub status: i32,

    /// Directory holding every artifact of this session.
    pub run_dir: PathBuf,

    /// Merged log, if any segments were produced.
    pub merged: Option<PathBuf>,

    pub focus: FocusLog,
}

impl TraceRun {
    pub fn focus_path(&self) -> &Path {
        &self.focus.path
    }

    /// Contents of the focus log, for display.
    pub fn focus_contents(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(&self.focus.path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Runs invocations under the tracer.
#[derive(Debug, Clone, Default)]
pub struct TraceSession {
    config: TraceConfig,
}

impl TraceSession {
    pub fn new(config: TraceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Trace `<target> <line>` in `mode`.
    ///
    /// A bare `target` name is looked up in the configured search path.
    ///
    /// # Errors
    ///
    /// - `TraceError::TargetRejected` if `target` is not an executable file
    /// - `TraceError::LogRoot` if no log root or run directory can be created
    /// - `TraceError::Exec` if the tracer process cannot be created for lack of
    ///   resources. A tracer that is missing is not an error: the session
    ///   reports status 127.
    pub async fn run(&self, target: &Path, line: &str, mode: TraceMode) -> Result<TraceRun, TraceError> {
        let executable = resolve_target(target, self.config.search_path())?;
        let root = LogRoot::resolve(self.config.log_roots())?;
        let run_dir = root.allocate_run()?;
        tracing::info!(run_dir = %run_dir.display(), mode = %mode, "trace session started");

        let meta = TraceMetadata::new(target, line, mode);
        if let Err(e) = meta.write_to(&run_dir) {
            tracing::warn!(run_dir = %run_dir.display(), error = %e, "cannot write trace metadata");
        }

        let commands = CommandList::single(self.tracer_argv(&run_dir, &executable, line, mode))
            .map_err(ExecError::from)?;
        let report = Pipeline::new(commands)
            .env_policy(EnvPolicy::search_path_only(self.config.search_path()))
            .run()
            .await?;
        let status = report.status();

        let merged = merge(&run_dir);
        let focus = FocusFilter::new(self.config.grep())
            .filter(&run_dir, merged.as_deref(), mode)
            .await;

        tracing::info!(
            run_dir = %run_dir.display(),
            status,
            merged = merged.is_some(),
            degraded = focus.degraded,
            "trace session finished"
        );

        Ok(TraceRun {
            status,
            run_dir,
            merged,
            focus,
        })
    }

    /// Blocking form of [`run`](Self::run).
    pub fn run_sync(&self, target: &Path, line: &str, mode: TraceMode) -> Result<TraceRun, TraceError> {
        block_on(self.run(target, line, mode))
    }

    /// The tracer invocation for one session.
    pub fn tracer_argv(&self, run_dir: &Path, target: &Path, line: &str, mode: TraceMode) -> Vec<String> {
        let mut argv = vec![
            self.config.tracer().display().to_string(),
            "-ff".to_string(),
            "-qq".to_string(),
            "-yy".to_string(),
            "-tt".to_string(),
            "-T".to_string(),
            "-s".to_string(),
            self.config.string_limit().to_string(),
        ];
        if let Some(filter) = mode.capture_filter() {
            argv.push("-e".to_string());
            argv.push(filter);
        }
        argv.push("-o".to_string());
        argv.push(run_dir.join(SEGMENT_PREFIX).display().to_string());
        argv.push(target.display().to_string());
        argv.push(line.to_string());
        argv
    }
}
