//! Exit status translation and aggregation.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Status reported for a stage whose program could not be resolved or exec'd.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Status reported for a stage whose redirect target could not be opened.
pub const REDIRECT_FAILURE_STATUS: i32 = 1;

/// Translate a wait status into a shell-style integer.
///
/// Normal exit yields the exit code (0..=255), termination by signal yields
/// `128 + signal`, anything else yields 1.
pub fn translate(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    if let Some(signal) = status.signal() {
        return 128 + signal;
    }
    1
}

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran and was reaped.
    Exited { pid: u32, status: i32 },

    /// The program could not be resolved or exec'd. No process survived.
    ExecFailed { program: String, reason: String },

    /// The redirect target could not be opened. The stage never started.
    RedirectFailed { reason: String },
}

impl StageOutcome {
    /// The stage's translated status.
    pub fn status(&self) -> i32 {
        match self {
            StageOutcome::Exited { status, .. } => *status,
            StageOutcome::ExecFailed { .. } => EXEC_FAILURE_STATUS,
            StageOutcome::RedirectFailed { .. } => REDIRECT_FAILURE_STATUS,
        }
    }

    /// Process id, if the stage was started.
    pub fn pid(&self) -> Option<u32> {
        match self {
            StageOutcome::Exited { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    /// True if the stage could not be started at all.
    pub fn failed_to_start(&self) -> bool {
        !matches!(self, StageOutcome::Exited { .. })
    }
}

/// Outcomes of every stage of one call, in spawn order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    stages: Vec<StageOutcome>,
}

impl PipelineReport {
    pub(crate) fn new(stages: Vec<StageOutcome>) -> Self {
        Self { stages }
    }

    /// Aggregated status: the last stage's status.
    ///
    /// Earlier stages are folded over and discarded. An empty report (which
    /// the executor never produces) folds to 0.
    pub fn status(&self) -> i32 {
        self.stages
            .iter()
            .fold(0, |_, outcome| outcome.status())
    }

    pub fn stages(&self) -> &[StageOutcome] {
        &self.stages
    }

    /// True if the last stage exited 0.
    pub fn success(&self) -> bool {
        self.status() == 0
    }

    /// True if any stage failed to exec or start.
    pub fn any_failed_to_start(&self) -> bool {
        self.stages.iter().any(StageOutcome::failed_to_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_exit_code() {
        assert_eq!(translate(ExitStatus::from_raw(0)), 0);
        // Wait status encodes the exit code in the high byte.
        assert_eq!(translate(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(translate(ExitStatus::from_raw(255 << 8)), 255);
    }

    #[test]
    fn test_translate_signal() {
        assert_eq!(translate(ExitStatus::from_raw(libc::SIGKILL)), 128 + 9);
        assert_eq!(translate(ExitStatus::from_raw(libc::SIGPIPE)), 128 + 13);
    }

    #[test]
    fn test_report_status_is_last_stage() {
        let report = PipelineReport::new(vec![
            StageOutcome::Exited { pid: 10, status: 0 },
            StageOutcome::ExecFailed {
                program: "nope".to_string(),
                reason: "not found".to_string(),
            },
            StageOutcome::Exited { pid: 12, status: 4 },
        ]);
        assert_eq!(report.status(), 4);
        assert!(report.any_failed_to_start());
        assert!(!report.success());
    }

    #[test]
    fn test_report_last_stage_exec_failure() {
        let report = PipelineReport::new(vec![
            StageOutcome::Exited { pid: 10, status: 0 },
            StageOutcome::ExecFailed {
                program: "nope".to_string(),
                reason: "not found".to_string(),
            },
        ]);
        assert_eq!(report.status(), EXEC_FAILURE_STATUS);
    }

    #[test]
    fn test_redirect_failure_status() {
        let outcome = StageOutcome::RedirectFailed {
            reason: "denied".to_string(),
        };
        assert_eq!(outcome.status(), REDIRECT_FAILURE_STATUS);
        assert_eq!(outcome.pid(), None);
    }
}
