//! Run commands on the machine `rig` itself is running on.
//!
//! Structurally this is the teacher's subprocess backend with the `ssh`
//! wrapper argv stripped away: `tokio::process::Command` spawns the shell
//! directly instead of spawning `ssh` with the remote command as its
//! trailing argument.

use std::process::Stdio as StdStdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{ExitStatus, ProcessIo, Stdio, Transport, Waiter};

/// The local transport. `connect`/`disconnect` are no-ops beyond flipping
/// a flag: there's no session to establish.
#[derive(Debug)]
pub struct LocalTransport {
    connected: AtomicBool,
}

impl LocalTransport {
    pub fn new() -> Self {
        LocalTransport {
            connected: AtomicBool::new(false),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

struct LocalWaiter {
    child: tokio::process::Child,
}

#[async_trait]
impl Waiter for LocalWaiter {
    async fn wait(mut self: Box<Self>) -> Result<ExitStatus> {
        let status = self.child.wait().await.map_err(Error::Io)?;
        Ok(ExitStatus {
            code: status.code(),
        })
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, _timeout: Duration) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn start_process(
        &self,
        cmd: &str,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(Box<dyn Waiter>, ProcessIo)> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        command.stdin(to_std_stdio(stdin));
        command.stdout(to_std_stdio(stdout));
        command.stderr(to_std_stdio(stderr));

        let mut child = command.spawn().map_err(Error::Spawn)?;

        let io = ProcessIo {
            stdin: child.stdin.take().map(|s| Box::pin(s) as _),
            stdout: child.stdout.take().map(|s| Box::pin(s) as _),
            stderr: child.stderr.take().map(|s| Box::pin(s) as _),
        };

        Ok((Box::new(LocalWaiter { child }), io))
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<ExitStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let status = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(StdStdio::inherit())
            .stdout(StdStdio::inherit())
            .stderr(StdStdio::inherit())
            .status()
            .await
            .map_err(Error::Spawn)?;
        Ok(ExitStatus {
            code: status.code(),
        })
    }

    async fn is_windows(&self) -> Result<bool> {
        Ok(cfg!(target_os = "windows"))
    }

    fn protocol(&self) -> &'static str {
        "Local"
    }

    fn address(&self) -> &str {
        "localhost"
    }
}

fn to_std_stdio(s: Stdio) -> StdStdio {
    match s {
        Stdio::Null => StdStdio::null(),
        Stdio::Piped => StdStdio::piped(),
        Stdio::Inherit => StdStdio::inherit(),
    }
}

/// Read an `AsyncRead` fully into a `Vec<u8>`, used by `Runner::exec_output`
/// against any transport's piped stdout/stderr.
pub(crate) async fn drain(mut r: impl tokio::io::AsyncRead + Unpin) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[allow(dead_code)]
pub(crate) async fn feed(mut w: impl tokio::io::AsyncWrite + Unpin, data: &[u8]) -> std::io::Result<()> {
    w.write_all(data).await?;
    w.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exec_output_matches_echoed_argument() {
        let t = LocalTransport::new();
        t.connect(Duration::from_secs(1)).await.unwrap();
        let (waiter, io) = t
            .start_process("echo hello", Stdio::Null, Stdio::Piped, Stdio::Null)
            .await
            .unwrap();
        let out = drain(io.stdout.unwrap()).await.unwrap();
        let status = waiter.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[tokio::test]
    async fn not_connected_before_connect() {
        let t = LocalTransport::new();
        let result = t
            .start_process("echo hi", Stdio::Null, Stdio::Null, Stdio::Null)
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
