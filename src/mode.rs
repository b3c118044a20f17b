//! Trace capture modes.

use std::fmt;
use std::str::FromStr;

/// Syscalls captured in [`TraceMode::Narrow`]: the ones that wire a pipeline.
pub const NARROW_SYSCALLS: &[&str] = &[
    "execve",
    "clone",
    "fork",
    "vfork",
    "wait4",
    "waitid",
    "exit_group",
    "pipe",
    "pipe2",
    "dup2",
    "openat",
    "close",
    "write",
];

/// How much the tracer captures, and how the focus log is filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TraceMode {
    /// Capture only pipeline-wiring syscalls. The focus filter only removes noise.
    #[default]
    Narrow,

    /// Capture everything. The focus filter selects curated syscall categories.
    Broad,
}

impl TraceMode {
    /// Stable label used in run metadata.
    pub fn label(self) -> &'static str {
        match self {
            TraceMode::Narrow => "pipe",
            TraceMode::Broad => "all",
        }
    }

    /// The tracer's syscall filter expression, if capture is restricted.
    pub fn capture_filter(self) -> Option<String> {
        match self {
            TraceMode::Narrow => Some(format!("trace={}", NARROW_SYSCALLS.join(","))),
            TraceMode::Broad => None,
        }
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Unrecognized trace mode label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trace mode: {0} (expected pipe or all)")]
pub struct UnknownTraceMode(pub String);

impl FromStr for TraceMode {
    type Err = UnknownTraceMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipe" | "narrow" => Ok(TraceMode::Narrow),
            "all" | "broad" => Ok(TraceMode::Broad),
            other => Err(UnknownTraceMode(other.to_string())),
        }
    }
}
