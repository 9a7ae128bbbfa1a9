use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::ServiceManager;

/// macOS's label convention for the handful of services this crate touches
/// (`org.<name>` plists live under `/Library/LaunchDaemons`).
fn label_for(name: &str) -> String {
    format!("org.{name}")
}

#[derive(Debug)]
pub(super) struct Launchd;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    match runner.exec_output("uname", &["-s"]).await {
        Ok(out) if String::from_utf8_lossy(&out.stdout).trim() == "Darwin" => {
            Ok(Some(Arc::new(Launchd)))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ServiceManager for Launchd {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("launchctl", &["kickstart", "-k", &format!("system/{}", label_for(name))])
            .await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("launchctl", &["kill", "SIGTERM", &format!("system/{}", label_for(name))])
            .await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        self.stop(runner, name).await?;
        self.start(runner, name).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("launchctl", &["load", "-w", &self.script_path(name).await])
            .await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("launchctl", &["unload", "-w", &self.script_path(name).await])
            .await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("launchctl", &["list", &label_for(name)]).await?;
        Ok(out.success())
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/Library/LaunchDaemons/{}.plist", label_for(name))
    }

    fn label(&self) -> &'static str {
        "launchd"
    }
}
