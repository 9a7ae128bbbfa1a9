//! The transport layer: a bidirectional byte channel to a host, plus the
//! ability to start a remote process bound to stdin/stdout/stderr.
//!
//! Every backend (§4.1 of the spec) implements [`Transport`]. [`Runner`]
//! (in [`crate::runner`]) is the only thing that should call into a
//! `Transport` directly; everything above the runner (services, package
//! managers, the filesystem drivers) goes through it instead.
//!
//! [`Runner`]: crate::runner::Runner

pub mod local;
#[cfg(feature = "openssh-transport")]
pub mod openssh;
#[cfg(feature = "ssh-transport")]
pub mod ssh;
#[cfg(feature = "winrm-transport")]
pub mod winrm;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// `{address, port}`. Must be validated before use: address non-empty,
/// port in `1..=65535`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Endpoint {
    /// A DNS name or IP literal.
    pub address: String,
    /// 1..65535.
    pub port: u16,
}

impl Endpoint {
    /// Construct a new endpoint without validating it.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Endpoint {
            address: address.into(),
            port,
        }
    }

    /// Check that the address is non-empty and the port is in range.
    ///
    /// `port == 0` is rejected; `Endpoint` doesn't carry a default port
    /// because that default is backend-specific (SSH 22, WinRM
    /// 5985/5986) and is applied by the caller before constructing this.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::ValidationFailed("endpoint address is empty".into()));
        }
        if self.port == 0 {
            return Err(Error::ValidationFailed("endpoint port must be 1..=65535".into()));
        }
        Ok(())
    }

    pub(crate) fn host_port(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// How a stream should be attached to a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdio {
    /// No input, or discard output.
    Null,
    /// Create an OS pipe and return the local end as part of [`ProcessIo`].
    Piped,
    /// Share the caller's own stdin/stdout/stderr.
    Inherit,
}

/// The local ends of whichever streams were configured as [`Stdio::Piped`].
pub struct ProcessIo {
    /// Write half connected to the remote process's stdin.
    pub stdin: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    /// Read half connected to the remote process's stdout.
    pub stdout: Option<Pin<Box<dyn AsyncRead + Send>>>,
    /// Read half connected to the remote process's stderr.
    pub stderr: Option<Pin<Box<dyn AsyncRead + Send>>>,
}

impl fmt::Debug for ProcessIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessIo")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// The exit status of a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// The process's exit code, when the backend can report one.
    ///
    /// `None` generally means the process was killed by something other
    /// than its own exit path (signal, disconnected transport).
    pub code: Option<i32>,
}

impl ExitStatus {
    /// A status representing successful (zero) exit.
    pub const SUCCESS: ExitStatus = ExitStatus { code: Some(0) };

    /// Whether this status represents success.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The lazy handle returned by [`Transport::start_process`].
///
/// Exactly one `wait()` may be called per waiter.
#[async_trait]
pub trait Waiter: Send {
    /// Block until the remote process exits, then return its status.
    ///
    /// A categorical `Error::CommandFailed` is not raised here — `wait`
    /// always returns the raw exit status; callers that want "non-zero is
    /// an error" semantics go through [`crate::runner::Runner`], which
    /// applies that policy uniformly (including the Windows stderr rule).
    async fn wait(self: Box<Self>) -> Result<ExitStatus>;
}

/// A bidirectional channel to a host, with the ability to start processes.
///
/// All methods take `&self` (not `&mut self`) apart from `connect` and
/// `disconnect`, mirroring the spec's requirement that `StartProcess` may
/// be invoked concurrently once connected; interior mutability (a mutex
/// around the underlying session handle) is each backend's job.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Establish the session. Idempotent: calling `connect` again after a
    /// successful connect must return `Ok(())` without redoing the work.
    async fn connect(&self, timeout: Duration) -> Result<()>;

    /// Tear down any owned resources. Safe to call from any state.
    async fn disconnect(&self) -> Result<()>;

    /// Whether `connect` has completed successfully and `disconnect` has
    /// not since been called.
    fn is_connected(&self) -> bool;

    /// Spawn a remote process with the three streams attached as
    /// configured by `stdin`/`stdout`/`stderr`.
    async fn start_process(
        &self,
        cmd: &str,
        stdin: Stdio,
        stdout: Stdio,
        stderr: Stdio,
    ) -> Result<(Box<dyn Waiter>, ProcessIo)>;

    /// Run `cmd` as an interactive session: allocate a PTY where the
    /// backend supports it and forward the caller's own stdin/stdout/
    /// stderr directly (no piping), returning once the session ends.
    async fn exec_interactive(&self, cmd: &str) -> Result<ExitStatus>;

    /// Probe (and cache) whether the remote host is Windows.
    async fn is_windows(&self) -> Result<bool>;

    /// Short protocol label: `"SSH"`, `"OpenSSH"`, `"WinRM"`, `"Local"`.
    fn protocol(&self) -> &'static str;

    /// The dialed address, for display purposes.
    fn address(&self) -> &str;
}

/// One configured transport variant, exactly as it appears in a
/// [`crate::config::HostConfig`].
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Native SSH session (no `ssh(1)` subprocess).
    Ssh(SshConfig),
    /// `ssh(1)` subprocess with optional control-master multiplexing.
    OpenSsh(OpenSshConfig),
    /// WinRM over HTTP/HTTPS.
    WinRm(WinRmConfig),
    /// Run directly on the local machine.
    Local,
}

impl TransportConfig {
    /// Shorthand for the synthetic local transport.
    pub fn local() -> Self {
        TransportConfig::Local
    }

    /// Validate the configured variant's fields.
    pub fn validate(&self) -> Result<()> {
        match self {
            TransportConfig::Ssh(c) => c.validate(),
            TransportConfig::OpenSsh(c) => c.validate(),
            TransportConfig::WinRm(c) => c.validate(),
            TransportConfig::Local => Ok(()),
        }
    }
}

/// SSH transport configuration (native backend).
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Host and port to dial.
    pub endpoint: Endpoint,
    /// Remote username.
    pub user: String,
    /// Path to a private key file, if not relying on the agent.
    pub key_path: Option<PathBuf>,
    /// A bastion to tunnel the connection through, one level deep.
    pub bastion: Option<Box<SshConfig>>,
    /// Path to an `ssh_config`-format file to source additional options.
    pub config_path: Option<PathBuf>,
    /// Whether to keep the connection alive with periodic probes.
    pub keepalive: bool,
}

impl SshConfig {
    fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        if self.user.trim().is_empty() {
            return Err(Error::ValidationFailed("ssh: user is empty".into()));
        }
        if let Some(bastion) = &self.bastion {
            bastion.validate()?;
        }
        Ok(())
    }
}

/// OpenSSH (subprocess) transport configuration.
#[derive(Debug, Clone)]
pub struct OpenSshConfig {
    /// Host and port to dial.
    pub endpoint: Endpoint,
    /// Remote username.
    pub user: String,
    /// Path to a private key file.
    pub key_path: Option<PathBuf>,
    /// Path to an `ssh_config`-format file.
    pub config_path: Option<PathBuf>,
    /// Extra `-o Key=Value` options, applied after `config_path`.
    pub options: std::collections::BTreeMap<String, String>,
    /// Disable control-master multiplexing; every call spawns a fresh
    /// `ssh` subprocess instead of reusing a control socket.
    pub disable_multiplexing: bool,
}

impl OpenSshConfig {
    fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        if self.user.trim().is_empty() {
            return Err(Error::ValidationFailed("openssh: user is empty".into()));
        }
        Ok(())
    }
}

/// WinRM transport configuration.
#[derive(Debug, Clone)]
pub struct WinRmConfig {
    /// Host and port to dial.
    pub endpoint: Endpoint,
    /// Remote username.
    pub user: String,
    /// Remote password.
    pub password: String,
    /// Use HTTPS instead of HTTP.
    pub use_https: bool,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Use NTLM authentication instead of basic auth. Not implemented;
    /// setting this fails validation rather than silently falling back to
    /// an unauthenticated request.
    pub use_ntlm: bool,
    /// Path to a CA certificate to trust.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to a client certificate (certificate auth).
    pub cert_path: Option<PathBuf>,
    /// Path to the client certificate's private key.
    pub key_path: Option<PathBuf>,
    /// Override the TLS server name used for SNI/verification.
    pub tls_server_name: Option<String>,
    /// Dial through an SSH bastion first.
    pub bastion: Option<SshConfig>,
}

impl WinRmConfig {
    fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        if self.user.trim().is_empty() {
            return Err(Error::ValidationFailed("winrm: user is empty".into()));
        }
        if self.use_ntlm {
            return Err(Error::ValidationFailed(
                "winrm: ntlm authentication is not supported (use basic or certificate auth)"
                    .into(),
            ));
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(Error::ValidationFailed(
                "winrm: cert_path and key_path must both be set for certificate auth".into(),
            ));
        }
        if let Some(bastion) = &self.bastion {
            bastion.validate()?;
        }
        Ok(())
    }
}

/// Build the concrete [`Transport`] for a [`TransportConfig`].
pub fn build(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    config.validate()?;
    match config {
        TransportConfig::Local => Ok(Box::new(local::LocalTransport::new())),

        #[cfg(feature = "openssh-transport")]
        TransportConfig::OpenSsh(c) => Ok(Box::new(openssh::OpenSshTransport::new(c.clone()))),
        #[cfg(not(feature = "openssh-transport"))]
        TransportConfig::OpenSsh(_) => Err(Error::ValidationFailed(
            "openssh transport not compiled in (enable the `openssh-transport` feature)".into(),
        )),

        #[cfg(feature = "ssh-transport")]
        TransportConfig::Ssh(c) => Ok(Box::new(ssh::SshTransport::new(c.clone()))),
        #[cfg(not(feature = "ssh-transport"))]
        TransportConfig::Ssh(_) => Err(Error::ValidationFailed(
            "ssh transport not compiled in (enable the `ssh-transport` feature)".into(),
        )),

        #[cfg(feature = "winrm-transport")]
        TransportConfig::WinRm(c) => Ok(Box::new(winrm::WinRmTransport::new(c.clone())?)),
        #[cfg(not(feature = "winrm-transport"))]
        TransportConfig::WinRm(_) => Err(Error::ValidationFailed(
            "winrm transport not compiled in (enable the `winrm-transport` feature)".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_rejects_empty_address() {
        assert!(Endpoint::new("", 22).validate().is_err());
    }

    #[test]
    fn endpoint_rejects_zero_port() {
        assert!(Endpoint::new("host", 0).validate().is_err());
    }

    #[test]
    fn endpoint_accepts_valid() {
        assert!(Endpoint::new("host.example.com", 22).validate().is_ok());
    }

    fn winrm_cfg() -> WinRmConfig {
        WinRmConfig {
            endpoint: Endpoint::new("host.example.com", 5985),
            user: "admin".into(),
            password: "secret".into(),
            use_https: false,
            insecure: false,
            use_ntlm: false,
            ca_cert_path: None,
            cert_path: None,
            key_path: None,
            tls_server_name: None,
            bastion: None,
        }
    }

    #[test]
    fn winrm_rejects_ntlm() {
        let mut cfg = winrm_cfg();
        cfg.use_ntlm = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn winrm_rejects_cert_without_key() {
        let mut cfg = winrm_cfg();
        cfg.cert_path = Some("/tmp/client.crt".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn winrm_accepts_basic_auth_config() {
        assert!(winrm_cfg().validate().is_ok());
    }
}
