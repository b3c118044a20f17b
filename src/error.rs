//! Error types for pipetrace.
//!
//! Errors fall into three groups:
//! - [`PipelineError`]: the command list was rejected before any process was created
//! - [`ExecError`]: a fatal condition during a call (pipe or spawn exhaustion, wait failure)
//! - [`TraceError`]: a tracing session could not be set up
//!
//! Exec-resolution failures and redirect failures are not errors at this level.
//! They are contained to the owning stage and surface in its
//! [`StageOutcome`](crate::StageOutcome).

use std::path::PathBuf;
use thiserror::Error;

/// Command list rejected before spawning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The command list has no stages.
    #[error("pipeline has no stages")]
    EmptyPipeline,

    /// A stage has an empty argument vector.
    #[error("stage {index} has no program name")]
    EmptyStage { index: usize },
}

/// Fatal execution error. The whole call is aborted.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Creating an anonymous pipe failed
    #[error("failed to create pipe: {reason}")]
    PipeFailed { reason: String },

    /// The process could not be created (not an exec-resolution failure)
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    /// Waiting for a spawned process failed
    #[error("failed to wait for {program}: {reason}")]
    WaitFailed { program: String, reason: String },

    /// Could not build the runtime used by the synchronous entry points
    #[error("failed to create runtime: {reason}")]
    Runtime { reason: String },

    #[error(transparent)]
    Rejected(#[from] PipelineError),
}

/// Failure to bind a stage's standard output to a file.
///
/// Fatal to the owning stage only: that stage is never started.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("redirect target is empty")]
    EmptyPath,

    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure to provide a directory for a trace session.
#[derive(Debug, Error)]
pub enum LogRootError {
    /// None of the candidate log roots could be created.
    #[error("no writable log root (tried {})", display_paths(tried))]
    Unwritable { tried: Vec<PathBuf> },

    /// The per-session run directory could not be created.
    #[error("cannot create run directory {path}: {source}")]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error setting up or driving a trace session.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The target executable failed validation
    #[error("target rejected: {path} ({reason})")]
    TargetRejected { path: String, reason: String },

    /// Configuration is unusable
    #[error("invalid trace configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    LogRoot(#[from] LogRootError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
