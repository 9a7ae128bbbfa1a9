use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::ServiceManager;

#[derive(Debug)]
pub(super) struct Runit;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    match runner.exec("sh", &["-c", "command -v sv"]).await {
        Ok(()) => Ok(Some(Arc::new(Runit))),
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl ServiceManager for Runit {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("sv", &["up", name]).await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("sv", &["down", name]).await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("sv", &["restart", name]).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec(
                "sh",
                &[
                    "-c",
                    &format!("ln -sf /etc/sv/{name} /var/service/{name}"),
                ],
            )
            .await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("sh", &["-c", &format!("rm -f /var/service/{name}")])
            .await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("sv", &["status", name]).await?;
        Ok(out.success() && String::from_utf8_lossy(&out.stdout).contains("run:"))
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/etc/sv/{name}/run")
    }

    fn label(&self) -> &'static str {
        "runit"
    }
}
