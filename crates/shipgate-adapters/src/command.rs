//! External process execution for CLI-backed adapters.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// One process invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Written to the child's stdin, then stdin is closed. Never logged.
    pub stdin: Option<String>,
    /// Kill the child after this long.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `program arg1 arg2`, for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandOutput {
    /// Exit status plus the last `lines` lines of stderr (or stdout when
    /// stderr is empty).
    pub fn failure_detail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.lines().collect();
        let tail = all[all.len().saturating_sub(lines)..].join("\n");
        format!("exit status {}: {}", self.exit_code, tail.trim())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    TimedOut { program: String, secs: u64 },

    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `spec` to completion, capturing output.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
    if spec.program.is_empty() {
        return Err(CommandError::Empty);
    }
    let start = Instant::now();
    debug!(command = %spec.display(), "spawning");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    let io_err = |source| CommandError::Io {
        program: spec.program.clone(),
        source,
    };

    let mut child = command.spawn().map_err(|source| CommandError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
        stdin.write_all(input.as_bytes()).await.map_err(io_err)?;
        stdin.shutdown().await.map_err(io_err)?;
    }

    let output = match spec.timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| CommandError::TimedOut {
                program: spec.program.clone(),
                secs: limit.as_secs(),
            })?
            .map_err(io_err)?,
        None => child.wait_with_output().await.map_err(io_err)?,
    };

    let result = CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
        success: output.status.success(),
    };
    debug!(
        program = %spec.program,
        exit_code = result.exit_code,
        duration_ms = result.duration_ms,
        "process finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_detail_keeps_tail_of_stderr() {
        let out = CommandOutput {
            exit_code: 1,
            stdout: "ignored".to_string(),
            stderr: "one\ntwo\nthree\n".to_string(),
            duration_ms: 5,
            success: false,
        };
        assert_eq!(out.failure_detail(2), "exit status 1: two\nthree");
    }

    #[test]
    fn failure_detail_falls_back_to_stdout() {
        let out = CommandOutput {
            exit_code: 2,
            stdout: "boom".to_string(),
            stderr: "  ".to_string(),
            duration_ms: 5,
            success: false,
        };
        assert_eq!(out.failure_detail(10), "exit status 2: boom");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = run_command(&CommandSpec::new("echo").arg("hello"))
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let result = run_command(&CommandSpec::new("false"))
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn stdin_is_forwarded() {
        let result = run_command(&CommandSpec::new("cat").stdin("from-stdin"))
            .await
            .expect("execute failed");
        assert_eq!(result.stdout, "from-stdin");
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let err = run_command(
            &CommandSpec::new("sleep")
                .arg("5")
                .timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = run_command(&CommandSpec::new("shipgate-no-such-binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
