//! Pipeline execution.
//!
//! `Pipeline` wires N stages left to right with anonymous pipes, binds the
//! optional redirect target to the last stage's stdout, spawns every stage,
//! and only then reaps them in spawn order.
//!
//! Descriptor ownership:
//! - every pipe end is an `OwnedFd` created close-on-exec
//! - a stage's stdin/stdout handles move into that stage's `Command`, which is
//!   dropped right after spawn, closing the orchestrator's copies
//! - the read end of stage i's pipe is the only descriptor carried over to
//!   stage i+1; nothing is carried past the last stage

use crate::env_policy::EnvPolicy;
use crate::error::ExecError;
use crate::pipe::PipeEnds;
use crate::redirect::open_truncating;
use crate::stage::{CommandList, Stage};
use crate::status::{translate, PipelineReport, StageOutcome};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A pipeline ready to run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    commands: CommandList,
    redirect: Option<PathBuf>,
    env_policy: EnvPolicy,
}

/// A stage that has been dealt with during the spawn phase.
enum Spawned {
    Running {
        index: usize,
        program: String,
        pid: u32,
        child: Child,
    },
    NotStarted(StageOutcome),
}

impl Pipeline {
    pub fn new(commands: CommandList) -> Self {
        Self {
            commands,
            redirect: None,
            env_policy: EnvPolicy::default(),
        }
    }

    /// Send the last stage's standard output to `path` (created or truncated).
    pub fn redirect(mut self, path: impl Into<PathBuf>) -> Self {
        self.redirect = Some(path.into());
        self
    }

    /// Set the environment policy for every stage.
    pub fn env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn redirect_target(&self) -> Option<&Path> {
        self.redirect.as_deref()
    }

    /// Spawn every stage, then reap them all.
    ///
    /// # Errors
    ///
    /// - `ExecError::PipeFailed` or `ExecError::SpawnFailed` on resource
    ///   exhaustion. Stages spawned before the failure are reaped first.
    /// - `ExecError::WaitFailed` if a stage cannot be reaped
    ///
    /// A stage whose program cannot be resolved is not an error: it is
    /// reported as `StageOutcome::ExecFailed` (status 127) and the rest of the
    /// pipeline still runs.
    pub async fn run(self) -> Result<PipelineReport, ExecError> {
        let env = self.env_policy.resolve();
        let stages = self.commands.stages();
        let last = stages.len() - 1;

        let mut spawned: Vec<Spawned> = Vec::with_capacity(stages.len());
        let mut upstream: Option<OwnedFd> = None;

        for (index, stage) in stages.iter().enumerate() {
            let program = stage.program().unwrap_or_default().to_string();
            let stdin = upstream.take();

            let (stdout, next_upstream) = if index < last {
                let pipe = match PipeEnds::new() {
                    Ok(pipe) => pipe,
                    Err(e) => {
                        drop(stdin);
                        return abort(spawned, e).await;
                    }
                };
                (Some(Stdio::from(pipe.write)), Some(pipe.read))
            } else {
                match self.redirect.as_deref().map(open_truncating) {
                    None => (None, None),
                    Some(Ok(file)) => (Some(Stdio::from(file)), None),
                    Some(Err(e)) => {
                        // Dropping stdin here lets upstream writers see EPIPE.
                        drop(stdin);
                        diagnostic(&program, &e.to_string());
                        tracing::warn!(index, program = %program, error = %e, "redirect failed");
                        spawned.push(Spawned::NotStarted(StageOutcome::RedirectFailed {
                            reason: e.to_string(),
                        }));
                        continue;
                    }
                }
            };

            match spawn_stage(stage, stdin, stdout, env.as_ref()) {
                Ok(child) => {
                    let pid = child.id().unwrap_or_default();
                    tracing::debug!(index, program = %program, pid, "spawned stage");
                    spawned.push(Spawned::Running {
                        index,
                        program,
                        pid,
                        child,
                    });
                }
                Err(e) if is_exec_failure(&e) => {
                    diagnostic(&program, &e.to_string());
                    tracing::warn!(index, program = %program, error = %e, "exec failed");
                    spawned.push(Spawned::NotStarted(StageOutcome::ExecFailed {
                        program,
                        reason: e.to_string(),
                    }));
                }
                Err(e) => {
                    drop(next_upstream);
                    let err = ExecError::SpawnFailed {
                        program,
                        reason: e.to_string(),
                    };
                    return abort(spawned, err).await;
                }
            }

            upstream = next_upstream;
        }

        let outcomes = reap(spawned).await?;
        Ok(PipelineReport::new(outcomes))
    }

    /// Run on a private current-thread runtime.
    pub fn run_sync(self) -> Result<PipelineReport, ExecError> {
        block_on(self.run())
    }
}

/// Run `commands` with an optional redirect and return the aggregated status.
pub async fn execute(commands: CommandList, redirect: Option<&Path>) -> Result<i32, ExecError> {
    let mut pipeline = Pipeline::new(commands);
    if let Some(path) = redirect {
        pipeline = pipeline.redirect(path);
    }
    Ok(pipeline.run().await?.status())
}

/// Blocking form of [`execute`].
pub fn execute_sync(commands: CommandList, redirect: Option<&Path>) -> Result<i32, ExecError> {
    block_on(execute(commands, redirect))
}

/// Run a single command: the one-stage pipeline.
pub async fn run_single(stage: impl Into<Stage>, redirect: Option<&Path>) -> Result<i32, ExecError> {
    let commands = CommandList::single(stage)?;
    execute(commands, redirect).await
}

/// Drive `future` to completion on a fresh current-thread runtime.
///
/// When called from inside a runtime the future is moved to a scoped thread,
/// since a runtime cannot be started from within another one.
pub(crate) fn block_on<F, T, E>(future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: From<ExecError> + Send,
{
    let drive = move || -> Result<T, E> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExecError::Runtime {
                reason: e.to_string(),
            })?;
        rt.block_on(future)
    };

    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::scope(|s| s.spawn(drive).join()).unwrap_or_else(|_| {
            Err(ExecError::Runtime {
                reason: "orchestrator thread panicked".to_string(),
            }
            .into())
        })
    } else {
        drive()
    }
}

/// Build and spawn one stage.
///
/// The `Command` is local to this function: its stdin/stdout handles are
/// closed in the orchestrator as soon as it returns, on success or failure.
fn spawn_stage(
    stage: &Stage,
    stdin: Option<OwnedFd>,
    stdout: Option<Stdio>,
    env: Option<&HashMap<String, String>>,
) -> io::Result<Child> {
    let program = stage.program().unwrap_or_default();
    let mut cmd = Command::new(program);
    cmd.args(stage.args());

    if let Some(env) = env {
        cmd.env_clear().envs(env);
    }
    if let Some(fd) = stdin {
        cmd.stdin(Stdio::from(fd));
    }
    if let Some(out) = stdout {
        cmd.stdout(out);
    }

    cmd.spawn()
}

/// Whether a spawn error means "this program cannot be exec'd" rather than
/// "the system cannot create a process".
fn is_exec_failure(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::InvalidInput {
        // Interior NUL in the program name or an argument.
        return true;
    }
    matches!(
        err.raw_os_error(),
        Some(
            libc::ENOENT
                | libc::EACCES
                | libc::ENOEXEC
                | libc::ENOTDIR
                | libc::EISDIR
                | libc::ELOOP
                | libc::ENAMETOOLONG
                | libc::ETXTBSY
                | libc::E2BIG
        )
    )
}

/// One-line diagnostic on the error stream, naming the program.
fn diagnostic(program: &str, reason: &str) {
    eprintln!("pipetrace: {}: {}", program, reason);
}

/// Wait for every started stage in spawn order.
async fn reap(spawned: Vec<Spawned>) -> Result<Vec<StageOutcome>, ExecError> {
    let mut outcomes = Vec::with_capacity(spawned.len());

    for entry in spawned {
        let outcome = match entry {
            Spawned::Running {
                index,
                program,
                pid,
                mut child,
            } => {
                let status = child.wait().await.map_err(|e| ExecError::WaitFailed {
                    program: program.clone(),
                    reason: e.to_string(),
                })?;
                let status = translate(status);
                tracing::debug!(index, program = %program, pid, status, "reaped stage");
                StageOutcome::Exited { pid, status }
            }
            Spawned::NotStarted(outcome) => outcome,
        };
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

/// Reap what was already started, then report the fatal error.
async fn abort<T>(spawned: Vec<Spawned>, err: ExecError) -> Result<T, ExecError> {
    tracing::warn!(error = %err, started = spawned.len(), "aborting pipeline");
    eprintln!("pipetrace: {}", err);
    if let Err(reap_err) = reap(spawned).await {
        tracing::warn!(error = %reap_err, "reaping after abort failed");
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EXEC_FAILURE_STATUS;
    use tempfile::TempDir;

    fn list(stages: Vec<Vec<&str>>) -> CommandList {
        CommandList::new(stages).unwrap()
    }

    #[tokio::test]
    async fn test_single_stage_exit_code() {
        let report = Pipeline::new(list(vec![vec!["sh", "-c", "exit 7"]]))
            .run()
            .await
            .unwrap();
        assert_eq!(report.status(), 7);
        assert_eq!(report.stages().len(), 1);
        assert!(report.stages()[0].pid().is_some());
    }

    #[tokio::test]
    async fn test_signal_translated() {
        let status = run_single(vec!["sh", "-c", "kill -9 $$"], None).await.unwrap();
        assert_eq!(status, 128 + 9);
    }

    #[tokio::test]
    async fn test_echo_into_wc_redirected() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.txt");

        let status = execute(
            list(vec![vec!["echo", "hi"], vec!["wc", "-c"]]),
            Some(&out),
        )
        .await
        .unwrap();

        assert_eq!(status, 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "3");
    }

    #[tokio::test]
    async fn test_status_is_last_stage() {
        let report = Pipeline::new(list(vec![vec!["false"], vec!["true"]]))
            .run()
            .await
            .unwrap();
        assert_eq!(report.stages()[0].status(), 1);
        assert_eq!(report.status(), 0);

        let report = Pipeline::new(list(vec![vec!["true"], vec!["false"]]))
            .run()
            .await
            .unwrap();
        assert_eq!(report.status(), 1);
    }

    #[tokio::test]
    async fn test_missing_program_is_127() {
        let report = Pipeline::new(list(vec![vec!["pipetrace-no-such-binary"]]))
            .run()
            .await
            .unwrap();
        assert_eq!(report.status(), EXEC_FAILURE_STATUS);
        match &report.stages()[0] {
            StageOutcome::ExecFailed { program, .. } => {
                assert_eq!(program, "pipetrace-no-such-binary")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redirect_failure_contained_to_last_stage() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("missing/dir/out.txt");

        let report = Pipeline::new(list(vec![vec!["echo", "hi"], vec!["cat"]]))
            .redirect(&out)
            .run()
            .await
            .unwrap();

        assert!(matches!(
            report.stages()[1],
            StageOutcome::RedirectFailed { .. }
        ));
        assert_eq!(report.status(), 1);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_fixed_env_replaces_environment() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("env.txt");

        let report = Pipeline::new(list(vec![vec!["env"]]))
            .env_policy(EnvPolicy::search_path_only("/usr/bin:/bin"))
            .redirect(&out)
            .run()
            .await
            .unwrap();

        assert_eq!(report.status(), 0);
        let contents = std::fs::read_to_string(&out).unwrap();
        assert_eq!(contents.trim(), "PATH=/usr/bin:/bin");
    }

    #[test]
    fn test_run_sync_outside_runtime() {
        let status = execute_sync(list(vec![vec!["true"]]), None).unwrap();
        assert_eq!(status, 0);
    }

    #[tokio::test]
    async fn test_run_sync_inside_runtime() {
        let report = Pipeline::new(list(vec![vec!["sh", "-c", "exit 3"]]))
            .run_sync()
            .unwrap();
        assert_eq!(report.status(), 3);
    }

    #[test]
    fn test_exec_failure_classification() {
        assert!(is_exec_failure(&io::Error::from_raw_os_error(libc::ENOENT)));
        assert!(is_exec_failure(&io::Error::from_raw_os_error(libc::EACCES)));
        assert!(!is_exec_failure(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_exec_failure(&io::Error::from_raw_os_error(libc::EMFILE)));
    }
}
