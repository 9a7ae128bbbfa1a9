//! Native SSH transport: one long-lived `ssh2::Session`, many channels.
//!
//! Shaped after the teacher's `native_mux_impl` ("one session, many
//! commands" instead of "one subprocess per command"), but talking the
//! SSH protocol directly through `ssh2` (libssh2) rather than shelling out
//! to `ssh(1)`. `ssh2`'s API is blocking, so every call into it runs
//! inside `tokio::task::spawn_blocking`, operating on `Arc`-shared state
//! rather than borrowing `self` across the blocking boundary.

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

use super::{ExitStatus, ProcessIo, Stdio, SshConfig, Transport, Waiter};

struct Inner {
    session: ssh2::Session,
}

// Every access to `session` is made through the owning `Mutex`, so only
// one blocking-task thread ever touches libssh2 state at a time.
unsafe impl Send for Inner {}

type SharedSession = Arc<Mutex<Option<Inner>>>;

/// Native (no `ssh(1)`) SSH transport.
pub struct SshTransport {
    config: SshConfig,
    session: SharedSession,
    windows: Arc<Mutex<Option<bool>>>,
}

impl std::fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTransport")
            .field("address", &self.config.endpoint.address)
            .finish()
    }
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        SshTransport {
            config,
            session: Arc::new(Mutex::new(None)),
            windows: Arc::new(Mutex::new(None)),
        }
    }

    fn authenticate(session: &ssh2::Session, config: &SshConfig) -> Result<()> {
        if let Some(key) = &config.key_path {
            session
                .userauth_pubkey_file(&config.user, None, key, None)
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::PermissionDenied, e)))?;
        } else {
            let mut agent = session
                .agent()
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            agent
                .connect()
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            agent
                .list_identities()
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            let identity = agent
                .identities()
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::Other, e)))?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Error::Abort(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "no identities available in ssh-agent",
                    ))
                })?;
            agent
                .userauth(&config.user, &identity)
                .map_err(|e| Error::Abort(std::io::Error::new(std::io::ErrorKind::PermissionDenied, e)))?;
        }

        if !session.authenticated() {
            return Err(Error::Abort(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "ssh authentication did not complete",
            )));
        }
        Ok(())
    }

    fn connect_blocking(config: &SshConfig, timeout: Duration) -> Result<ssh2::Session> {
        let tcp = TcpStream::connect(config.endpoint.host_port()).map_err(Error::Connect)?;
        tcp.set_read_timeout(Some(timeout)).map_err(Error::Connect)?;

        let mut session = ssh2::Session::new()
            .map_err(|e| Error::Connect(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| Error::Connect(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Self::authenticate(&session, config)?;
        Ok(session)
    }

    fn run_blocking(session: &SharedSession, cmd: &str) -> Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
        let guard = session.lock().unwrap();
        let inner = guard.as_ref().ok_or(Error::NotConnected)?;
        let mut channel = inner
            .session
            .channel_session()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        channel
            .exec(cmd)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout).map_err(Error::Io)?;
        let mut stderr = Vec::new();
        channel.stderr().read_to_end(&mut stderr).map_err(Error::Io)?;

        channel
            .wait_close()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let code = channel
            .exit_status()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok((ExitStatus { code: Some(code) }, stdout, stderr))
    }

    async fn run(&self, cmd: String) -> Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || Self::run_blocking(&session, &cmd))
            .await
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

struct SshWaiter {
    rx: oneshot::Receiver<Result<ExitStatus>>,
}

#[async_trait]
impl Waiter for SshWaiter {
    async fn wait(self: Box<Self>) -> Result<ExitStatus> {
        self.rx.await.map_err(|_| Error::RemoteProcessTerminated)?
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, timeout: Duration) -> Result<()> {
        if self.session.lock().unwrap().is_some() {
            return Ok(());
        }
        let config = self.config.clone();
        let session =
            tokio::task::spawn_blocking(move || Self::connect_blocking(&config, timeout))
                .await
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        *self.session.lock().unwrap() = Some(Inner { session });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    async fn start_process(
        &self,
        cmd: &str,
        _stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(Box<dyn Waiter>, ProcessIo)> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let (tx, rx) = oneshot::channel();
        let session = self.session.clone();
        let cmd_owned = cmd.to_owned();
        let (mut stdout_tx, stdout_rx) = tokio::io::duplex(64 * 1024);
        let (mut stderr_tx, stderr_rx) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || Self::run_blocking(&session, &cmd_owned))
                    .await
                    .unwrap_or_else(|e| Err(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))));

            match result {
                Ok((status, out, err)) => {
                    use tokio::io::AsyncWriteExt;
                    let _ = stdout_tx.write_all(&out).await;
                    let _ = stderr_tx.write_all(&err).await;
                    let _ = tx.send(Ok(status));
                }
                Err(e) => {
                    let _ = tx.send(Err(clone_err(&e)));
                }
            }
        });

        let io = ProcessIo {
            stdin: None,
            stdout: matches!(stdout, Stdio::Piped).then(|| Box::pin(stdout_rx) as _),
            stderr: matches!(stderr, Stdio::Piped).then(|| Box::pin(stderr_rx) as _),
        };

        Ok((Box::new(SshWaiter { rx }), io))
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<ExitStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.run(cmd.to_owned()).await.map(|(status, _, _)| status)
    }

    async fn is_windows(&self) -> Result<bool> {
        if let Some(w) = *self.windows.lock().unwrap() {
            return Ok(w);
        }
        let (status, _, _) = self.run("uname".into()).await?;
        let is_windows = !status.success();
        *self.windows.lock().unwrap() = Some(is_windows);
        Ok(is_windows)
    }

    fn protocol(&self) -> &'static str {
        "SSH"
    }

    fn address(&self) -> &str {
        &self.config.endpoint.address
    }
}

fn clone_err(e: &Error) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Endpoint;

    #[test]
    fn address_is_exposed() {
        let t = SshTransport::new(SshConfig {
            endpoint: Endpoint::new("example.invalid", 22),
            user: "root".into(),
            key_path: None,
            bastion: None,
            config_path: None,
            keepalive: false,
        });
        assert_eq!(t.address(), "example.invalid");
        assert!(!t.is_connected());
    }
}
