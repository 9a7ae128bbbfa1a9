//! `ssh(1)` subprocess transport, with control-master multiplexing.
//!
//! `connect` spawns a backgrounded `ssh -M -f -N` master that owns the
//! actual network connection; every subsequent command (and the one-shot
//! `is_connected` check) spawns a short-lived `ssh -S <socket>` that rides
//! the existing master instead of renegotiating. This is the same split
//! the teacher's `SessionBuilder::launch_master`/`process_impl::Session`
//! use; the two are generalized here into async methods on one struct.
//!
//! When `OpenSshConfig.disable_multiplexing` is set, no master is ever
//! launched: `connect` degrades to a single no-op connectivity check and
//! every command spawns its own unmultiplexed `ssh` process.

use std::path::PathBuf;
use std::process::Stdio as StdStdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{ExitStatus, OpenSshConfig, ProcessIo, Stdio, Transport, Waiter};

#[derive(Debug)]
struct Master {
    _dir: TempDir,
    socket: PathBuf,
}

/// `ssh(1)`-subprocess transport.
#[derive(Debug)]
pub struct OpenSshTransport {
    config: OpenSshConfig,
    master: Mutex<Option<Master>>,
    windows: Mutex<Option<bool>>,
    /// Only meaningful when `config.disable_multiplexing` is set: tracks
    /// whether the one-shot connectivity check in `connect` has succeeded,
    /// since there's no master socket to stand in for "connected".
    connected: Mutex<bool>,
}

impl OpenSshTransport {
    pub fn new(config: OpenSshConfig) -> Self {
        OpenSshTransport {
            config,
            master: Mutex::new(None),
            windows: Mutex::new(None),
            connected: Mutex::new(false),
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.endpoint.address)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-o".into(), "BatchMode=yes".into()];
        args.push("-p".into());
        args.push(self.config.endpoint.port.to_string());
        if let Some(key) = &self.config.key_path {
            args.push("-o".into());
            args.push("IdentitiesOnly=yes".into());
            args.push("-i".into());
            args.push(key.display().to_string());
        }
        if let Some(config_path) = &self.config.config_path {
            args.push("-F".into());
            args.push(config_path.display().to_string());
        }
        for (k, v) in &self.config.options {
            args.push("-o".into());
            args.push(format!("{k}={v}"));
        }
        args
    }

    async fn launch_master(&self) -> Result<Master> {
        let dir = tempfile::Builder::new()
            .prefix(".rig-ssh")
            .tempdir()
            .map_err(Error::Io)?;
        let socket = dir.path().join("master");
        let log = dir.path().join("log");

        let mut cmd = Command::new("ssh");
        cmd.stdin(StdStdio::null())
            .stdout(StdStdio::null())
            .stderr(StdStdio::null())
            .arg("-E")
            .arg(&log)
            .arg("-S")
            .arg(&socket)
            .arg("-M")
            .arg("-f")
            .arg("-N")
            .arg("-o")
            .arg("ControlPersist=yes")
            .args(self.base_args())
            .arg(self.destination());

        let status = cmd.status().await.map_err(Error::Spawn)?;
        if !status.success() {
            let output = tokio::fs::read_to_string(&log).await.unwrap_or_default();
            return Err(Error::interpret_ssh_error(&output));
        }

        Ok(Master { _dir: dir, socket })
    }

    fn command(&self, master: &Master, extra: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.stdin(StdStdio::null())
            .arg("-S")
            .arg(&master.socket)
            .arg("-o")
            .arg("BatchMode=yes")
            .args(extra)
            .arg(self.destination());
        cmd
    }

    fn with_master<T>(&self, f: impl FnOnce(&Master) -> T) -> Result<T> {
        let guard = self.master.lock().unwrap();
        guard.as_ref().map(f).ok_or(Error::NotConnected)
    }

    /// A fresh, unmultiplexed `ssh` invocation: no `-S <socket>`, so every
    /// call renegotiates its own connection. Used when
    /// `config.disable_multiplexing` is set.
    fn direct_command(&self, extra: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.stdin(StdStdio::null())
            .args(self.base_args())
            .args(extra)
            .arg(self.destination());
        cmd
    }
}

struct SshWaiter {
    child: tokio::process::Child,
}

#[async_trait]
impl Waiter for SshWaiter {
    async fn wait(mut self: Box<Self>) -> Result<ExitStatus> {
        let status = self.child.wait().await.map_err(Error::Io)?;
        Ok(ExitStatus {
            code: status.code(),
        })
    }
}

#[async_trait]
impl Transport for OpenSshTransport {
    async fn connect(&self, _timeout: Duration) -> Result<()> {
        if self.config.disable_multiplexing {
            if *self.connected.lock().unwrap() {
                return Ok(());
            }
            // No control master to set up: just prove the host is reachable
            // with a single no-op command, since every later call spawns its
            // own `ssh` process regardless.
            let mut cmd = self.direct_command(&["-o", "BatchMode=yes", "-p", "9", "--", "true"]);
            let output = cmd.output().await.map_err(Error::Spawn)?;
            if !output.status.success() {
                return Err(Error::interpret_ssh_error(&String::from_utf8_lossy(
                    &output.stderr,
                )));
            }
            *self.connected.lock().unwrap() = true;
            return Ok(());
        }
        if self.master.lock().unwrap().is_some() {
            return Ok(());
        }
        let master = self.launch_master().await?;
        *self.master.lock().unwrap() = Some(master);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.config.disable_multiplexing {
            *self.connected.lock().unwrap() = false;
            return Ok(());
        }
        let master = self.master.lock().unwrap().take();
        if let Some(master) = master {
            let mut cmd = self.command(&master, &["-O", "exit"]);
            let _ = cmd
                .stdout(StdStdio::null())
                .stderr(StdStdio::null())
                .status()
                .await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        if self.config.disable_multiplexing {
            return *self.connected.lock().unwrap();
        }
        self.master.lock().unwrap().is_some()
    }

    async fn start_process(
        &self,
        cmd: &str,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(Box<dyn Waiter>, ProcessIo)> {
        let mut command = if self.config.disable_multiplexing {
            if !*self.connected.lock().unwrap() {
                return Err(Error::NotConnected);
            }
            self.direct_command(&["-T", "--"])
        } else {
            // -p 9 (the discard port) ensures ssh never opens a fresh
            // connection when the control socket is gone instead of
            // silently succeeding.
            self.with_master(|m| self.command(m, &["-T", "-p", "9", "--"]))?
        };
        command.arg("sh").arg("-c").arg(cmd);
        command.stdin(to_std_stdio(stdin));
        command.stdout(to_std_stdio(stdout));
        command.stderr(to_std_stdio(stderr));

        let mut child = command.spawn().map_err(Error::Spawn)?;
        let io = ProcessIo {
            stdin: child.stdin.take().map(|s| Box::pin(s) as _),
            stdout: child.stdout.take().map(|s| Box::pin(s) as _),
            stderr: child.stderr.take().map(|s| Box::pin(s) as _),
        };
        Ok((Box::new(SshWaiter { child }), io))
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<ExitStatus> {
        let mut command = if self.config.disable_multiplexing {
            if !*self.connected.lock().unwrap() {
                return Err(Error::NotConnected);
            }
            self.direct_command(&["-t", "--"])
        } else {
            self.with_master(|m| self.command(m, &["-t", "--"]))?
        };
        command.arg("sh").arg("-c").arg(cmd);
        command.stdin(StdStdio::inherit());
        command.stdout(StdStdio::inherit());
        command.stderr(StdStdio::inherit());
        let status = command.status().await.map_err(Error::Spawn)?;
        Ok(ExitStatus {
            code: status.code(),
        })
    }

    async fn is_windows(&self) -> Result<bool> {
        if let Some(w) = *self.windows.lock().unwrap() {
            return Ok(w);
        }
        let mut command = if self.config.disable_multiplexing {
            if !*self.connected.lock().unwrap() {
                return Err(Error::NotConnected);
            }
            self.direct_command(&["-T", "--"])
        } else {
            self.with_master(|m| self.command(m, &["-T", "-p", "9", "--"]))?
        };
        command.arg("uname");
        let output = command.output().await.map_err(Error::Spawn)?;
        let is_windows = !output.status.success();
        *self.windows.lock().unwrap() = Some(is_windows);
        Ok(is_windows)
    }

    fn protocol(&self) -> &'static str {
        "OpenSSH"
    }

    fn address(&self) -> &str {
        &self.config.endpoint.address
    }
}

fn to_std_stdio(s: Stdio) -> StdStdio {
    match s {
        Stdio::Null => StdStdio::null(),
        Stdio::Piped => StdStdio::piped(),
        Stdio::Inherit => StdStdio::inherit(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoint;

    fn cfg() -> OpenSshConfig {
        OpenSshConfig {
            endpoint: Endpoint::new("example.invalid", 22),
            user: "root".into(),
            key_path: None,
            config_path: None,
            options: Default::default(),
            disable_multiplexing: false,
        }
    }

    #[test]
    fn destination_is_user_at_host() {
        let t = OpenSshTransport::new(cfg());
        assert_eq!(t.destination(), "root@example.invalid");
    }

    #[tokio::test]
    async fn operations_require_connect_first() {
        let t = OpenSshTransport::new(cfg());
        let result = t
            .start_process("echo hi", Stdio::Null, Stdio::Null, Stdio::Null)
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn disabled_multiplexing_requires_connect_first_with_no_master() {
        let mut config = cfg();
        config.disable_multiplexing = true;
        let t = OpenSshTransport::new(config);
        assert!(!t.is_connected());
        let result = t
            .start_process("echo hi", Stdio::Null, Stdio::Null, Stdio::Null)
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
        // Non-multiplexed mode tracks connectedness without ever touching
        // the control-master socket.
        assert!(t.master.lock().unwrap().is_none());
    }
}
