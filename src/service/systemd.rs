use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::{EnvFileWriter, LogReader, Reloader, Restarter, ServiceManager};

#[derive(Debug)]
pub(super) struct Systemd;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    match runner.exec_output("stat", &["/run/systemd/system"]).await {
        Ok(out) if out.success() => Ok(Some(Arc::new(Systemd))),
        _ => Ok(None),
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["start", name]).await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["stop", name]).await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["restart", name]).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["enable", name]).await?;
        Reloader::reload(self, runner).await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["disable", name]).await?;
        Reloader::reload(self, runner).await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("systemctl", &["is-active", name]).await?;
        Ok(out.success())
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/etc/systemd/system/{name}.service")
    }

    fn label(&self) -> &'static str {
        "systemd"
    }
}

#[async_trait]
impl Restarter for Systemd {
    async fn native_restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("systemctl", &["restart", name]).await
    }
}

#[async_trait]
impl Reloader for Systemd {
    async fn reload(&self, runner: &Runner) -> Result<()> {
        runner.exec("systemctl", &["daemon-reload"]).await
    }
}

#[async_trait]
impl LogReader for Systemd {
    async fn logs(&self, runner: &Runner, name: &str, lines: u32) -> Result<String> {
        let n = lines.to_string();
        let out = runner
            .exec_output("journalctl", &["-u", name, "-n", &n, "--no-pager"])
            .await?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl EnvFileWriter for Systemd {
    fn env_file_path(&self, name: &str) -> String {
        format!("/etc/systemd/system/{name}.d/override.conf")
    }

    fn render_env_file(&self, vars: &[(String, String)]) -> String {
        let mut out = String::from("[Service]\n");
        for (k, v) in vars {
            out.push_str(&format!("Environment=\"{k}={v}\"\n"));
        }
        out
    }
}
