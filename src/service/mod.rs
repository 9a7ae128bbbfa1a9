//! Init-system backends: translate `Start`/`Stop`/`Restart`/`Enable`/
//! `Disable`/`IsRunning` into the shell invocation a given init system
//! understands, selected by probing in the order listed in the table this
//! module implements (systemd, openrc, upstart, sysvinit, runit, launchd,
//! winsvc).

mod launchd;
mod openrc;
mod runit;
mod sysvinit;
mod systemd;
mod upstart;
mod winsvc;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::runner::Runner;

/// Every init-system backend implements this minimal core.
#[async_trait]
pub trait ServiceManager: Send + Sync + std::fmt::Debug {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()>;
    async fn stop(&self, runner: &Runner, name: &str) -> Result<()>;
    async fn restart(&self, runner: &Runner, name: &str) -> Result<()>;
    async fn enable(&self, runner: &Runner, name: &str) -> Result<()>;
    async fn disable(&self, runner: &Runner, name: &str) -> Result<()>;
    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool>;
    async fn script_path(&self, name: &str) -> String;

    /// Short label used in error messages and `Debug`.
    fn label(&self) -> &'static str;
}

/// Opt-in extension: a backend that exposes a faster or more native
/// restart than stop-then-start.
#[async_trait]
pub trait Restarter: ServiceManager {
    async fn native_restart(&self, runner: &Runner, name: &str) -> Result<()>;
}

/// Opt-in extension: a backend that needs to reload unit/config state
/// after `enable`/`disable`.
#[async_trait]
pub trait Reloader: ServiceManager {
    async fn reload(&self, runner: &Runner) -> Result<()>;
}

/// Opt-in extension: a backend that can tail N lines of a service's logs.
#[async_trait]
pub trait LogReader: ServiceManager {
    async fn logs(&self, runner: &Runner, name: &str, lines: u32) -> Result<String>;
}

/// Opt-in extension: a backend with a file-based environment-override
/// mechanism (systemd drop-ins, OpenRC's `/etc/conf.d/<name>`).
#[async_trait]
pub trait EnvFileWriter: ServiceManager {
    /// Where the override file for `name` lives.
    fn env_file_path(&self, name: &str) -> String;
    /// Render `vars` in this backend's override-file syntax.
    fn render_env_file(&self, vars: &[(String, String)]) -> String;
}

/// `{runner, initsys, name}` — delegates every operation to the detected
/// backend. Carries no state of its own beyond what `wait_state` needs
/// locally (a poll loop, not a stored machine).
#[derive(Debug, Clone)]
pub struct Service {
    runner: Arc<Runner>,
    backend: Arc<dyn ServiceManager>,
    name: String,
}

impl Service {
    pub fn new(runner: Arc<Runner>, backend: Arc<dyn ServiceManager>, name: impl Into<String>) -> Self {
        Service {
            runner,
            backend,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_label(&self) -> &'static str {
        self.backend.label()
    }

    pub async fn start(&self) -> Result<()> {
        self.backend.start(&self.runner, &self.name).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.backend.stop(&self.runner, &self.name).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.backend.restart(&self.runner, &self.name).await
    }

    pub async fn enable(&self) -> Result<()> {
        self.backend.enable(&self.runner, &self.name).await
    }

    pub async fn disable(&self) -> Result<()> {
        self.backend.disable(&self.runner, &self.name).await
    }

    pub async fn is_running(&self) -> Result<bool> {
        self.backend.is_running(&self.runner, &self.name).await
    }

    /// Poll `is_running` until it matches `desired` or `timeout` elapses.
    /// No backoff between polls, matching the spec's stated semantics;
    /// cancellation is the caller's `timeout` budget.
    pub async fn wait_state(&self, desired: bool, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_running().await? == desired {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::CommandFailed {
                    code: None,
                    stderr: format!(
                        "timed out waiting for {} to reach running={desired}",
                        self.name
                    )
                    .into_bytes(),
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}

/// Input to each backend's accept probe: the connected runner plus the
/// service name being resolved. Most backends ignore the name (their
/// probe is host-wide, e.g. "does `systemctl` exist"); sysvinit's probe
/// is the one exception (`stat /etc/init.d/<name>`), which is why the
/// name has to travel through the provider instead of being looked up
/// only after a backend is already chosen.
pub type ProbeInput = (Arc<Runner>, Arc<str>);

/// Build the provider used by [`crate::client::Client`] to detect the
/// init system for a connected runner, probing in table order.
pub fn provider() -> Provider<ProbeInput, Arc<dyn ServiceManager>> {
    let mut provider = Provider::new(Error::NoInitSystem);
    provider
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(systemd::probe(runner))))
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(openrc::probe(runner))))
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(upstart::probe(runner))))
        .register(Arc::new(|(runner, name): ProbeInput| {
            Box::pin(sysvinit::probe(runner, name))
        }))
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(runit::probe(runner))))
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(launchd::probe(runner))))
        .register(Arc::new(|(runner, _name): ProbeInput| Box::pin(winsvc::probe(runner))));
    provider
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};
    use crate::transport::Transport;
    use std::time::Duration as StdDuration;

    async fn connected_mock() -> Arc<MockTransport> {
        let t = Arc::new(MockTransport::new(false));
        t.connect(StdDuration::from_secs(1)).await.unwrap();
        t
    }

    #[tokio::test]
    async fn systemd_wins_when_its_marker_is_present() {
        let t = connected_mock().await;
        t.on("stat /run/systemd/system", ScriptedResponse::ok(Vec::new()));
        let runner = Arc::new(Runner::new(t));
        let backend = provider()
            .resolve((runner, Arc::from("nginx")))
            .await
            .unwrap();
        assert_eq!(backend.label(), "systemd");
    }

    #[tokio::test]
    async fn upstart_wins_when_only_initctl_is_present() {
        let t = connected_mock().await;
        t.on(
            "stat /run/systemd/system",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on(
            "sh -c 'command -v openrc-init'",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on(
            "sh -c 'grep -q sysinit /etc/inittab'",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on(
            "sh -c 'command -v initctl'",
            ScriptedResponse::ok(b"/sbin/initctl\n".to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let backend = provider()
            .resolve((runner, Arc::from("nginx")))
            .await
            .unwrap();
        assert_eq!(backend.label(), "upstart");
    }
}
