//! An in-memory [`Transport`] for exercising [`crate::runner::Runner`] and
//! the layers above it without a real host. Gated behind the `testing`
//! feature, matching the teacher crate's own pattern of shipping test
//! doubles as an opt-in part of the public API rather than only inside
//! `#[cfg(test)]`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{ExitStatus, ProcessIo, Stdio, Transport, Waiter};

/// A scripted response to one `start_process`/`exec_interactive` call.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub code: Option<i32>,
}

impl ScriptedResponse {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        ScriptedResponse {
            stdout: stdout.into(),
            stderr: Vec::new(),
            code: Some(0),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        ScriptedResponse {
            stdout: Vec::new(),
            stderr: stderr.into(),
            code: Some(code),
        }
    }
}

/// A transport whose replies are scripted in advance by command string.
#[derive(Debug)]
pub struct MockTransport {
    windows: bool,
    connected: Mutex<bool>,
    responses: Mutex<std::collections::HashMap<String, ScriptedResponse>>,
    default_response: ScriptedResponse,
    calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(windows: bool) -> Self {
        MockTransport {
            windows,
            connected: Mutex::new(false),
            responses: Mutex::new(std::collections::HashMap::new()),
            default_response: ScriptedResponse::ok(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script the exact reply for a given command string.
    pub fn on(&self, cmd: impl Into<String>, response: ScriptedResponse) {
        self.responses.lock().unwrap().insert(cmd.into(), response);
    }

    /// Every command string passed to `start_process`/`exec_interactive`,
    /// in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, cmd: &str) -> ScriptedResponse {
        self.calls.lock().unwrap().push(cmd.to_owned());
        self.responses
            .lock()
            .unwrap()
            .get(cmd)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }
}

struct MockWaiter {
    status: ExitStatus,
}

#[async_trait]
impl Waiter for MockWaiter {
    async fn wait(self: Box<Self>) -> Result<ExitStatus> {
        Ok(self.status)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _timeout: Duration) -> Result<()> {
        *self.connected.lock().unwrap() = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        *self.connected.lock().unwrap() = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
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
        let response = self.resolve(cmd);
        let io = ProcessIo {
            stdin: None,
            stdout: matches!(stdout, Stdio::Piped).then(|| {
                Box::pin(std::io::Cursor::new(response.stdout.clone()))
                    as std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>
            }),
            stderr: matches!(stderr, Stdio::Piped).then(|| {
                Box::pin(std::io::Cursor::new(response.stderr.clone()))
                    as std::pin::Pin<Box<dyn tokio::io::AsyncRead + Send>>
            }),
        };
        Ok((
            Box::new(MockWaiter {
                status: ExitStatus { code: response.code },
            }),
            io,
        ))
    }

    async fn exec_interactive(&self, cmd: &str) -> Result<ExitStatus> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let response = self.resolve(cmd);
        Ok(ExitStatus { code: response.code })
    }

    async fn is_windows(&self) -> Result<bool> {
        Ok(self.windows)
    }

    fn protocol(&self) -> &'static str {
        "Mock"
    }

    fn address(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_command_returns_configured_output() {
        let t = MockTransport::new(false);
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on("whoami", ScriptedResponse::ok(b"root\n".to_vec()));
        let (waiter, io) = t
            .start_process("whoami", Stdio::Null, Stdio::Piped, Stdio::Null)
            .await
            .unwrap();
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut io.stdout.unwrap(), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"root\n");
        assert!(waiter.wait().await.unwrap().success());
        assert_eq!(t.calls(), vec!["whoami".to_string()]);
    }

    #[tokio::test]
    async fn unscripted_command_defaults_to_success() {
        let t = MockTransport::new(false);
        t.connect(Duration::from_secs(1)).await.unwrap();
        let (waiter, _io) = t
            .start_process("anything", Stdio::Null, Stdio::Null, Stdio::Null)
            .await
            .unwrap();
        assert!(waiter.wait().await.unwrap().success());
    }
}
