//! Command execution on top of a [`Transport`].
//!
//! `Runner` generalizes the teacher's `Command`/`OwnedCommand` builder —
//! argument escaping, one-shot output capture, `Drop`-safe child handling —
//! from "exactly one `ssh` session type" to "any `Transport`", and adds
//! what the teacher never needed: command decorators (for `sudo` wrapping),
//! Windows `cmd.exe` argv quoting, and the stderr-as-failure rule WinRM/
//! PowerShell targets require because their exit codes aren't reliable
//! enough on their own.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::escape::{escape_posix, escape_windows};
use crate::transport::{ProcessIo, Stdio, Transport, Waiter};

/// A `String -> String` transform applied, in registration order, to the
/// fully-assembled command line before it is handed to the transport.
/// `sudo`/`doas` wrapping is implemented as one of these.
pub type Decorator = Arc<dyn Fn(&str) -> String + Send + Sync>;

static INVALID_FORMAT_ARTIFACT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%!\w\(\w+\)").expect("static regex is valid"));

/// The result of [`Runner::exec_output`].
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub code: Option<i32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs commands against one [`Transport`], applying decorators and the
/// platform-appropriate quoting/wrapping rules.
#[derive(Clone)]
pub struct Runner {
    transport: Arc<dyn Transport>,
    decorators: Vec<Decorator>,
    allow_win_stderr: bool,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("protocol", &self.transport.protocol())
            .field("address", &self.transport.address())
            .field("decorators", &self.decorators.len())
            .finish()
    }
}

impl Runner {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Runner {
            transport,
            decorators: Vec::new(),
            allow_win_stderr: false,
        }
    }

    /// Return a clone of this runner with `decorator` appended to the
    /// decorator chain. Used by [`crate::sudo`] to produce a
    /// privilege-elevated runner that still shares the parent's transport.
    pub fn with_decorator(&self, decorator: Decorator) -> Self {
        let mut decorators = self.decorators.clone();
        decorators.push(decorator);
        Runner {
            transport: self.transport.clone(),
            decorators,
            allow_win_stderr: self.allow_win_stderr,
        }
    }

    /// Opt out of the Windows "non-empty stderr on a zero exit is a
    /// failure" rule for this runner (and clones derived from it).
    pub fn allow_win_stderr(&self) -> Self {
        Runner {
            transport: self.transport.clone(),
            decorators: self.decorators.clone(),
            allow_win_stderr: true,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    async fn build_command_line(&self, program: &str, args: &[&str]) -> Result<String> {
        let windows = self.transport.is_windows().await?;
        let escape = if windows { escape_windows } else { escape_posix };

        let mut parts = Vec::with_capacity(args.len() + 1);
        parts.push(escape(program).into_owned());
        for arg in args {
            parts.push(escape(arg).into_owned());
        }
        let mut line = parts.join(" ");

        if INVALID_FORMAT_ARTIFACT.is_match(&line) {
            return Err(Error::InvalidCommand(line));
        }

        for decorator in &self.decorators {
            line = decorator(&line);
        }

        if windows && !first_token_is_exe(&line) {
            line = format!("cmd.exe /C \"{}\"", line.replace('"', "\"\""));
        }

        Ok(line)
    }

    /// Run a command, discarding its stdout/stderr, and return an error if
    /// it exits non-zero (or, on Windows, if it wrote to stderr and this
    /// runner hasn't opted out via [`Runner::allow_win_stderr`]).
    pub async fn exec(&self, program: &str, args: &[&str]) -> Result<()> {
        let out = self.exec_output(program, args).await?;
        self.enforce_success(&out)
    }

    /// Run a command and capture its stdout/stderr in full.
    pub async fn exec_output(&self, program: &str, args: &[&str]) -> Result<ExecOutput> {
        let line = self.build_command_line(program, args).await?;
        let (waiter, io) = self
            .transport
            .start_process(&line, Stdio::Null, Stdio::Piped, Stdio::Piped)
            .await?;

        let (stdout, stderr) = tokio::try_join!(
            drain(io.stdout),
            drain(io.stderr),
        )
        .map_err(Error::Io)?;

        let status = waiter.wait().await?;
        let out = ExecOutput {
            stdout,
            stderr,
            code: status.code,
        };
        Ok(out)
    }

    fn enforce_success(&self, out: &ExecOutput) -> Result<()> {
        if out.code != Some(0) {
            return Err(Error::CommandFailed {
                code: out.code,
                stderr: out.stderr.clone(),
            });
        }
        Ok(())
    }

    /// Run a command, applying the Windows stderr rule, and return an
    /// error built the same way [`Runner::exec`] would, but also handing
    /// back the captured output on success.
    pub async fn exec_checked(&self, program: &str, args: &[&str]) -> Result<ExecOutput> {
        let out = self.exec_output(program, args).await?;
        if out.code != Some(0) {
            return Err(Error::CommandFailed {
                code: out.code,
                stderr: out.stderr.clone(),
            });
        }
        if self.transport.is_windows().await? && !self.allow_win_stderr && !out.stderr.is_empty() {
            return Err(Error::WroteStderr);
        }
        Ok(out)
    }

    /// Run a command interactively, forwarding the caller's own stdin/
    /// stdout/stderr directly.
    pub async fn exec_interactive(&self, program: &str, args: &[&str]) -> Result<()> {
        let line = self.build_command_line(program, args).await?;
        let status = self.transport.exec_interactive(&line).await?;
        if !status.success() {
            return Err(Error::CommandFailed {
                code: status.code,
                stderr: Vec::new(),
            });
        }
        Ok(())
    }

    /// Start a command and stream its stdout line by line through the
    /// returned channel, without waiting for it to exit. `cancel` lets the
    /// caller stop consuming early; the underlying process is not killed,
    /// only the scan loop exits.
    pub async fn exec_scanner(
        &self,
        program: &str,
        args: &[&str],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(tokio::sync::mpsc::Receiver<String>, Box<dyn Waiter>)> {
        let line = self.build_command_line(program, args).await?;
        let (waiter, io) = self
            .transport
            .start_process(&line, Stdio::Null, Stdio::Piped, Stdio::Null)
            .await?;
        let stdout = io.stdout.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "transport did not provide a piped stdout",
            ))
        })?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.changed() => {
                        if *cancel.borrow() {
                            break;
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if tx.send(line).await.is_err() {
                                    break;
                                }
                            }
                            _ => break,
                        }
                    }
                }
            }
        });

        Ok((rx, waiter))
    }

    /// Start a command without waiting for it, returning the waiter and
    /// its piped streams for the caller to drive directly.
    pub async fn start(
        &self,
        program: &str,
        args: &[&str],
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(Box<dyn Waiter>, ProcessIo)> {
        let line = self.build_command_line(program, args).await?;
        self.transport.start_process(&line, stdin, stdout, stderr).await
    }
}

/// Whether `line`'s first whitespace-delimited token already ends in
/// `.exe`, in which case it's already a direct executable invocation and
/// doesn't need the `cmd.exe /C` wrapper (e.g. `ping.exe -n 1`).
fn first_token_is_exe(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .map(|token| token.trim_matches('"').to_lowercase().ends_with(".exe"))
        .unwrap_or(false)
}

async fn drain(stream: Option<std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};
    use std::time::Duration;

    async fn connected_mock(windows: bool) -> Arc<MockTransport> {
        let t = Arc::new(MockTransport::new(windows));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t
    }

    #[tokio::test]
    async fn exec_output_captures_stdout() {
        let t = connected_mock(false).await;
        t.on("whoami", ScriptedResponse::ok(b"root\n".to_vec()));
        let runner = Runner::new(t);
        let out = runner.exec_output("whoami", &[]).await.unwrap();
        assert_eq!(out.stdout, b"root\n");
        assert!(out.success());
    }

    #[tokio::test]
    async fn exec_fails_on_nonzero_exit() {
        let t = connected_mock(false).await;
        t.on("false", ScriptedResponse::failure(1, Vec::new()));
        let runner = Runner::new(t);
        let err = runner.exec("false", &[]).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RemoteFailure);
    }

    #[tokio::test]
    async fn decorator_wraps_command_line() {
        let t = connected_mock(false).await;
        t.on("sudo -n -- whoami", ScriptedResponse::ok(b"root\n".to_vec()));
        let runner = Runner::new(t.clone()).with_decorator(Arc::new(|cmd: &str| {
            format!("sudo -n -- {cmd}")
        }));
        let out = runner.exec_output("whoami", &[]).await.unwrap();
        assert_eq!(out.stdout, b"root\n");
        assert_eq!(t.calls(), vec!["sudo -n -- whoami".to_string()]);
    }

    #[tokio::test]
    async fn windows_targets_are_wrapped_in_cmd_exe() {
        let t = connected_mock(true).await;
        t.on(
            "cmd.exe /C \"whoami\"",
            ScriptedResponse::ok(b"NT AUTHORITY\\SYSTEM\r\n".to_vec()),
        );
        let runner = Runner::new(t.clone());
        let out = runner.exec_output("whoami", &[]).await.unwrap();
        assert!(out.success());
        assert_eq!(t.calls(), vec!["cmd.exe /C \"whoami\"".to_string()]);
    }

    #[tokio::test]
    async fn exe_targets_are_observed_verbatim_without_wrapping() {
        let t = connected_mock(true).await;
        t.on("ping.exe -n 1", ScriptedResponse::ok(Vec::new()));
        let runner = Runner::new(t.clone());
        let out = runner.exec_output("ping.exe", &["-n", "1"]).await.unwrap();
        assert!(out.success());
        assert_eq!(t.calls(), vec!["ping.exe -n 1".to_string()]);
    }

    #[tokio::test]
    async fn windows_stderr_on_zero_exit_is_a_failure_by_default() {
        let t = connected_mock(true).await;
        t.on(
            "cmd.exe /C \"whoami\"",
            ScriptedResponse {
                stdout: b"ok\r\n".to_vec(),
                stderr: b"warning: deprecated\r\n".to_vec(),
                code: Some(0),
            },
        );
        let runner = Runner::new(t);
        let err = runner.exec_checked("whoami", &[]).await.unwrap_err();
        assert!(matches!(err, Error::WroteStderr));
    }

    #[tokio::test]
    async fn allow_win_stderr_opts_out_of_the_rule() {
        let t = connected_mock(true).await;
        t.on(
            "cmd.exe /C \"whoami\"",
            ScriptedResponse {
                stdout: b"ok\r\n".to_vec(),
                stderr: b"warning: deprecated\r\n".to_vec(),
                code: Some(0),
            },
        );
        let runner = Runner::new(t).allow_win_stderr();
        let out = runner.exec_checked("whoami", &[]).await.unwrap();
        assert!(out.success());
    }

    #[tokio::test]
    async fn invalid_format_artifact_is_rejected_before_it_reaches_the_transport() {
        let t = connected_mock(false).await;
        let runner = Runner::new(t);
        let err = runner
            .exec("echo", &["%!d(MISSING)"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }
}
