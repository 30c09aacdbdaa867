//! Executor adapters: launch shell/batch/python/external processes with
//! merged env, workdir, and timeout, streaming stdout/stderr line by line.
//!
//! Each stream has its own serial reader, so chunks within one stream keep
//! their order; cross-stream ordering is whatever the child interleaves.
//! Timeout expiry kills the child and returns the partial output collected
//! so far with `killed = true`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::kernel::logs::LogStream;
use crate::models::ExecutorConfig;

use super::python_env::{prepare_python_command, PreparedPython};

/// One line of child output, tagged with its stream.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug)]
pub struct ExecOutcome {
    /// Exit code; `-1` when the child died without one (signal or kill).
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub killed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    pub timeout: Option<Duration>,
    /// Resolved working directory (source checkout already applied).
    pub workdir: Option<PathBuf>,
}

/// Platform-appropriate argv for a shell script.
fn shell_argv(script: &str, shell: &str) -> Vec<String> {
    if cfg!(windows) {
        match shell.to_lowercase().as_str() {
            "cmd" => vec!["cmd.exe".into(), "/c".into(), script.into()],
            _ => vec![
                "powershell.exe".into(),
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
                script.into(),
            ],
        }
    } else {
        match shell.to_lowercase().as_str() {
            "bash" => vec!["/bin/bash".into(), "-lc".into(), script.into()],
            // cmd/powershell scripts on a POSIX host fall back to bash.
            "cmd" | "powershell" => vec!["/bin/bash".into(), "-lc".into(), script.into()],
            other => vec![other.into(), "-c".into(), script.into()],
        }
    }
}

fn batch_argv(script: &str, shell: &str) -> Vec<String> {
    if cfg!(windows) {
        match shell.to_lowercase().as_str() {
            "powershell" => vec![
                "powershell.exe".into(),
                "-NoProfile".into(),
                "-NonInteractive".into(),
                "-Command".into(),
                script.into(),
            ],
            _ => vec!["cmd.exe".into(), "/c".into(), script.into()],
        }
    } else {
        // Batch on a POSIX host is emulated through bash.
        vec!["/bin/bash".into(), "-lc".into(), script.into()]
    }
}

/// Build the argv for an executor, preparing interpreter environments as
/// needed. The returned guard keeps any ephemeral venv alive for the run.
async fn build_argv(executor: &ExecutorConfig) -> Result<(Vec<String>, Option<PreparedPython>)> {
    match executor {
        ExecutorConfig::Shell { script, shell, .. } => Ok((shell_argv(script, shell), None)),
        ExecutorConfig::Batch { script, shell, .. } => Ok((batch_argv(script, shell), None)),
        ExecutorConfig::Python {
            code,
            interpreter,
            environment,
            args,
            ..
        } => {
            let prepared = prepare_python_command(environment, interpreter).await?;
            let mut argv = prepared.command.clone();
            argv.push("-c".to_string());
            argv.push(code.clone());
            argv.extend(args.iter().cloned());
            Ok((argv, Some(prepared)))
        }
        ExecutorConfig::External { command, args, .. } => {
            let mut argv = vec![command.clone()];
            argv.extend(args.iter().cloned());
            Ok((argv, None))
        }
    }
}

/// Kill the child and everything it spawned. The child runs as a process
/// group leader on Unix, so the group signal reaches shell descendants that
/// would otherwise hold the output pipes open.
fn kill_process_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
        return;
    }
    child.start_kill().ok();
}

fn spawn_line_reader<R>(
    reader: R,
    stream: LogStream,
    lines: Option<mpsc::Sender<OutputLine>>,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffered = BufReader::new(reader).lines();
        let mut collected = String::new();
        while let Ok(Some(line)) = buffered.next_line().await {
            collected.push_str(&line);
            collected.push('\n');
            if let Some(tx) = &lines {
                let _ = tx
                    .send(OutputLine {
                        stream,
                        text: line,
                    })
                    .await;
            }
        }
        collected
    })
}

/// Execute a job's configured process to completion or timeout.
///
/// When `lines` is given, every stdout/stderr line is forwarded as it
/// arrives; the full text is buffered for persistence either way.
pub async fn execute(
    executor: &ExecutorConfig,
    ctx: &ExecContext,
    lines: Option<mpsc::Sender<OutputLine>>,
) -> Result<ExecOutcome> {
    let (argv, _env_guard) = build_argv(executor).await?;
    let (program, args) = argv
        .split_first()
        .context("executor produced an empty command")?;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(executor.env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &ctx.workdir {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    // Own process group so a timeout kill reaches shell-spawned children.
    command.process_group(0);

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let stdout = child.stdout.take().context("child stdout not captured")?;
    let stderr = child.stderr.take().context("child stderr not captured")?;
    let stdout_task = spawn_line_reader(stdout, LogStream::Stdout, lines.clone());
    let stderr_task = spawn_line_reader(stderr, LogStream::Stderr, lines);

    let mut killed = false;
    let status = match ctx.timeout {
        Some(timeout) if !timeout.is_zero() => {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    killed = true;
                    kill_process_tree(&mut child);
                    child.wait().await?
                }
            }
        }
        _ => child.wait().await?,
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ExecOutcome {
        returncode: status.code().unwrap_or(-1),
        stdout,
        stderr,
        killed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn shell(script: &str) -> ExecutorConfig {
        ExecutorConfig::Shell {
            script: script.to_string(),
            shell: "bash".to_string(),
            args: vec![],
            env: HashMap::new(),
            workdir: None,
        }
    }

    #[cfg(unix)]
    #[test]
    fn shell_argv_uses_login_bash() {
        assert_eq!(shell_argv("echo hi", "bash"), vec!["/bin/bash", "-lc", "echo hi"]);
        // Windows shells fall back to bash on POSIX hosts.
        assert_eq!(shell_argv("echo hi", "cmd")[0], "/bin/bash");
        assert_eq!(batch_argv("echo hi", "cmd")[0], "/bin/bash");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shell_captures_stdout_and_exit_code() {
        let outcome = execute(&shell("echo ok"), &ExecContext::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome.returncode, 0);
        assert!(outcome.stdout.contains("ok"));
        assert!(!outcome.killed);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let outcome = execute(&shell("exit 3"), &ExecContext::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome.returncode, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let outcome = execute(
            &shell("echo out; echo err 1>&2"),
            &ExecContext::default(),
            None,
        )
        .await
        .unwrap();
        assert!(outcome.stdout.contains("out"));
        assert!(outcome.stderr.contains("err"));
        assert!(!outcome.stdout.contains("err"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_is_merged_over_process_env() {
        let mut env = HashMap::new();
        env.insert("HYDRA_TEST_VALUE".to_string(), "42".to_string());
        let executor = ExecutorConfig::Shell {
            script: "echo $HYDRA_TEST_VALUE".to_string(),
            shell: "bash".to_string(),
            args: vec![],
            env,
            workdir: None,
        };
        let outcome = execute(&executor, &ExecContext::default(), None)
            .await
            .unwrap();
        assert!(outcome.stdout.contains("42"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn workdir_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecContext {
            timeout: None,
            workdir: Some(dir.path().to_path_buf()),
        };
        let outcome = execute(&shell("pwd"), &ctx, None).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(outcome.stdout.contains(&canonical.to_string_lossy().to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_and_returns_partial_output() {
        let ctx = ExecContext {
            timeout: Some(Duration::from_millis(300)),
            workdir: None,
        };
        let outcome = execute(&shell("echo started; sleep 30; echo finished"), &ctx, None)
            .await
            .unwrap();
        assert!(outcome.killed);
        assert!(outcome.stdout.contains("started"));
        assert!(!outcome.stdout.contains("finished"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lines_stream_in_order_per_stream() {
        let (tx, mut rx) = mpsc::channel(16);
        let outcome = execute(
            &shell("echo one; echo two; echo three"),
            &ExecContext::default(),
            Some(tx),
        )
        .await
        .unwrap();
        assert_eq!(outcome.returncode, 0);

        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line.text);
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn external_executor_runs_binary_with_args() {
        let executor = ExecutorConfig::External {
            command: "/bin/echo".to_string(),
            args: vec!["hello".to_string(), "world".to_string()],
            env: HashMap::new(),
            workdir: None,
        };
        let outcome = execute(&executor, &ExecContext::default(), None)
            .await
            .unwrap();
        assert_eq!(outcome.returncode, 0);
        assert!(outcome.stdout.contains("hello world"));
    }
}
