//! # pipetrace
//!
//! Multi-process pipeline execution with output redirection, plus a
//! self-tracing subsystem built on the same primitives.
//!
//! `pipetrace` runs a command list as N cooperating processes chained by
//! anonymous pipes, optionally sends the last stage's output to a file, and
//! reports the last stage's exit status. A trace session runs a one-shot
//! invocation under `strace`, merges the per-process traces, and condenses
//! them into a focus log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipetrace::{CommandList, Pipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let commands = CommandList::new(vec![
//!     vec!["echo", "hi"],
//!     vec!["wc", "-c"],
//! ])?;
//!
//! let report = Pipeline::new(commands)
//!     .redirect("/tmp/out.txt")
//!     .run()
//!     .await?;
//!
//! assert_eq!(report.status(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! Tracing the same line through a shell binary:
//!
//! ```rust,no_run
//! use pipetrace::{TraceConfig, TraceMode, TraceSession};
//! use std::path::Path;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = TraceSession::new(TraceConfig::builder().build()?);
//! let run = session.run_sync(Path::new("./my-shell"), "echo hi | wc -c", TraceMode::Narrow)?;
//!
//! println!("[trace] {}", run.focus_path().display());
//! print!("{}", run.focus_contents()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Status rules
//!
//! - normal exit: the exit code; killed by a signal: `128 + signal`
//! - a program that cannot be resolved or exec'd: 127, with a diagnostic on
//!   stderr naming it; the rest of the pipeline still runs
//! - a pipeline reports its last stage's status
//!
//! ## Platform Support
//!
//! Unix only. Pipes, descriptor inheritance, and wait statuses are modeled on
//! POSIX semantics.

#[cfg(windows)]
compile_error!("pipetrace relies on POSIX pipes and wait statuses and does not support Windows.");

mod config;
mod env_policy;
mod error;
mod file_check;
mod focus;
mod log_root;
mod merge;
mod metadata;
mod mode;
mod pipe;
mod pipeline;
mod redirect;
mod session;
mod stage;
mod status;

// Public API
pub use config::{TraceConfig, TraceConfigBuilder, DEFAULT_GREP, DEFAULT_LOG_ROOTS, DEFAULT_TRACER};
pub use env_policy::{EnvPolicy, ALWAYS_STRIP, DEFAULT_TRACE_SEARCH_PATH};
pub use error::{ExecError, LogRootError, PipelineError, RedirectError, TraceError};
pub use file_check::{check_executable, resolve_target};
pub use focus::{FocusFilter, FocusLog, BROAD_INCLUDE, FOCUS_LOG, NOISE_EXCLUDE};
pub use log_root::{run_dir_name, run_started, LogRoot};
pub use merge::{
    discover_segments, merge, merge_at, merge_excluding, segment_pid, MERGED_LOG, SEGMENT_PREFIX,
};
pub use metadata::{TraceMetadata, METADATA_FILE};
pub use mode::{TraceMode, UnknownTraceMode, NARROW_SYSCALLS};
pub use pipe::PipeEnds;
pub use pipeline::{execute, execute_sync, run_single, Pipeline};
pub use redirect::{open_truncating, REDIRECT_MODE};
pub use session::{TraceRun, TraceSession};
pub use stage::{CommandList, Stage};
pub use status::{translate, PipelineReport, StageOutcome, EXEC_FAILURE_STATUS, REDIRECT_FAILURE_STATUS};
