//! Canonical error taxonomy for `rig`.
//!
//! Errors are classified into four kinds (see crate-level docs): abort,
//! not-connected, remote-failure, and transient. Rather than four separate
//! types, this is one flat enum with a `kind()` classifier, matching the
//! way the connection layer and the higher-level services need to branch
//! on "can a retry help" without downcasting.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The result type used throughout `rig`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How an [`Error`] should be treated by a retry loop or caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retrying will not help: bad validation, bad host key, missing auth,
    /// a command too long for the transport, explicit cancellation.
    Abort,
    /// The operation was attempted before `Connect` or after `Disconnect`.
    NotConnected,
    /// The remote process ran and exited non-zero.
    RemoteFailure,
    /// An I/O timeout or reset that a caller may retry.
    Transient,
}

/// Errors produced by `rig`.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A `TransportConfig` was not valid: zero or more than one transport
    /// variant configured, or a field failed a sanity check (bad port,
    /// empty address, ...).
    ValidationFailed(String),

    /// An operation was attempted on a connection that has not completed
    /// `connect()`, or that has since been `disconnect()`-ed.
    NotConnected,

    /// `Connect` failed in a way that proves retrying will not help: bad
    /// host key, auth failure, unreachable bastion, protocol mismatch.
    Abort(io::Error),

    /// `Connect` failed in a way that a caller's retry loop may recover
    /// from (timeout, connection reset, transient DNS failure).
    Connect(io::Error),

    /// The local `ssh`/helper binary could not be spawned.
    Spawn(io::Error),

    /// The remote command ran and exited with a non-zero status.
    CommandFailed {
        /// The exit code, when the transport can report one.
        code: Option<i32>,
        /// Captured stderr, when the runner was configured to capture it.
        stderr: Vec<u8>,
    },

    /// The remote process appears to have been terminated by something
    /// other than its own exit path (signal, connection drop).
    RemoteProcessTerminated,

    /// The command string still contained an unresolved format artifact
    /// (e.g. a stray `%!d(MISSING)`), which would otherwise be silently
    /// sent to the remote shell.
    InvalidCommand(String),

    /// The target is Windows, the command exited zero, but wrote to
    /// stderr and the caller did not opt out via `allow_win_stderr`.
    WroteStderr,

    /// `Upload` completed but the remote and local checksums disagree.
    ChecksumMismatch {
        /// SHA-256 of the local source file, hex-encoded.
        local: String,
        /// SHA-256 reported by the remote `Sha256` operation, hex-encoded.
        remote: String,
    },

    /// `Upload` failed before a checksum could even be compared.
    UploadFailed(String),

    /// No init-system backend accepted this host.
    NoInitSystem,

    /// No package-manager backend accepted this host.
    NoPackageManager,

    /// Neither `sudo` nor `doas` (nor, on Windows, a `runas` strategy)
    /// could be used non-interactively on this host.
    NoSudo,

    /// The host's OS release information could not be determined by any
    /// resolver.
    NotRecognized,

    /// A bastion or target host key did not match the configured/expected
    /// fingerprint.
    HostKeyMismatch,

    /// I/O failure unrelated to the remote command itself: reading/writing
    /// a local file, a broken pipe to a spawned helper, etc.
    Io(io::Error),

    /// A local file referenced by the caller (key file, ssh-config, CA
    /// cert) could not be read.
    LocalFile {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

impl Error {
    /// Classify this error for retry-loop purposes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ValidationFailed(_)
            | Error::Abort(_)
            | Error::InvalidCommand(_)
            | Error::HostKeyMismatch
            | Error::NoInitSystem
            | Error::NoPackageManager
            | Error::NoSudo
            | Error::NotRecognized => ErrorKind::Abort,

            Error::NotConnected => ErrorKind::NotConnected,

            Error::CommandFailed { .. }
            | Error::RemoteProcessTerminated
            | Error::WroteStderr
            | Error::ChecksumMismatch { .. }
            | Error::UploadFailed(_) => ErrorKind::RemoteFailure,

            Error::Connect(_) | Error::Spawn(_) | Error::Io(_) | Error::LocalFile { .. } => {
                ErrorKind::Transient
            }
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::Abort`.
    pub fn is_abort(&self) -> bool {
        self.kind() == ErrorKind::Abort
    }

    /// Turn the stderr of a failed `ssh` invocation into a classified
    /// [`Error`], using the same heuristics the teacher crate uses to
    /// distinguish connection failures from remote command failures:
    /// `ssh` exits 255 on its own protocol-level errors, and its stderr
    /// has a recognizable `ssh: <reason>: <io error>` shape.
    pub(crate) fn interpret_ssh_error(stderr: &str) -> Self {
        let mut stderr = stderr.trim();
        if let Some(rest) = stderr.strip_prefix("ssh: ") {
            stderr = rest;
        }
        if stderr.starts_with("Warning: Permanently added ") {
            stderr = stderr.split_once("\r\n").map(|x| x.1).unwrap_or("");
        }

        let mut kind = io::ErrorKind::ConnectionAborted;
        let mut parts = stderr.splitn(2, ": ");
        if let Some(ssh_error) = parts.next() {
            if ssh_error.starts_with("Could not resolve") {
                kind = io::ErrorKind::Other;
            }
            if let Some(io_error) = parts.next() {
                match io_error {
                    "Network is unreachable" => kind = io::ErrorKind::Other,
                    "Connection refused" => kind = io::ErrorKind::ConnectionRefused,
                    e if ssh_error.starts_with("connect to host")
                        && (e == "Connection timed out" || e == "Operation timed out") =>
                    {
                        kind = io::ErrorKind::TimedOut;
                    }
                    e if e.contains("Permission denied (") => {
                        kind = io::ErrorKind::PermissionDenied;
                    }
                    _ => {}
                }
            }
        }

        Error::Connect(io::Error::new(kind, stderr))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ValidationFailed(msg) => write!(f, "invalid host configuration: {msg}"),
            Error::NotConnected => write!(f, "operation attempted on a disconnected client"),
            Error::Abort(_) => write!(f, "connection failed and will not be retried"),
            Error::Connect(_) => write!(f, "failed to connect to the remote host"),
            Error::Spawn(_) => write!(f, "failed to spawn local helper process"),
            Error::CommandFailed { code, .. } => match code {
                Some(code) => write!(f, "remote command exited with status {code}"),
                None => write!(f, "remote command failed"),
            },
            Error::RemoteProcessTerminated => {
                write!(f, "remote process was terminated unexpectedly")
            }
            Error::InvalidCommand(msg) => write!(f, "refusing to execute malformed command: {msg}"),
            Error::WroteStderr => write!(f, "remote command wrote to stderr"),
            Error::ChecksumMismatch { local, remote } => write!(
                f,
                "checksum mismatch after upload: local={local} remote={remote}"
            ),
            Error::UploadFailed(msg) => write!(f, "upload failed: {msg}"),
            Error::NoInitSystem => write!(f, "no supported init system detected on this host"),
            Error::NoPackageManager => {
                write!(f, "no supported package manager detected on this host")
            }
            Error::NoSudo => write!(f, "no privilege-elevation strategy available on this host"),
            Error::NotRecognized => write!(f, "could not determine the host's OS release"),
            Error::HostKeyMismatch => write!(f, "host key did not match known_hosts"),
            Error::Io(_) => write!(f, "I/O error"),
            Error::LocalFile { path, .. } => write!(f, "failed to read {}", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Abort(e) | Error::Connect(e) | Error::Spawn(e) | Error::Io(e) => Some(e),
            Error::LocalFile { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Reconstruct an equivalent, owned [`Error`] from a shared reference.
/// `Error` isn't `Clone` (several variants carry an `io::Error`), so
/// memoized detection results are kept behind `Arc<Error>` and handed back
/// through this instead: the four detection sentinels round-trip exactly,
/// everything else degrades to a `ValidationFailed` carrying the same
/// message (and therefore the same `Abort` classification).
pub(crate) fn declassify(e: &Error) -> Error {
    match e {
        Error::NoInitSystem => Error::NoInitSystem,
        Error::NoPackageManager => Error::NoPackageManager,
        Error::NoSudo => Error::NoSudo,
        Error::NotRecognized => Error::NotRecognized,
        Error::NotConnected => Error::NotConnected,
        other => Error::ValidationFailed(other.to_string()),
    }
}

/// Wrap an error raised through a [`crate::provider::Null`] placeholder so
/// that callers still see the originating detection error, annotated with
/// which operation they attempted.
pub(crate) fn null_context(op: &str, cause: &Error) -> Error {
    match cause {
        Error::NoInitSystem => Error::NoInitSystem,
        Error::NoPackageManager => Error::NoPackageManager,
        Error::NoSudo => Error::NoSudo,
        Error::NotRecognized => Error::NotRecognized,
        _ => Error::ValidationFailed(format!("{op}: {cause}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ssh_error() {
        let stderr = "ssh: Warning: Permanently added \'login.example.com\' (ECDSA) to the list of known hosts.\r\nme@login.example.com: Permission denied (publickey,password).";
        let err = Error::interpret_ssh_error(stderr);
        match err {
            Error::Connect(e) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parse_connection_refused() {
        let stderr = "ssh: connect to host 10.0.0.5 port 22: Connection refused";
        let err = Error::interpret_ssh_error(stderr);
        match err {
            Error::Connect(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn kinds_classify_as_documented() {
        assert_eq!(Error::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(Error::NoSudo.kind(), ErrorKind::Abort);
        assert_eq!(
            Error::CommandFailed { code: Some(1), stderr: vec![] }.kind(),
            ErrorKind::RemoteFailure
        );
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::Other, "x")).kind(),
            ErrorKind::Transient
        );
    }
}
