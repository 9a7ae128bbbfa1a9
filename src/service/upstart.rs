use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::ServiceManager;

#[derive(Debug)]
pub(super) struct Upstart;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    match runner.exec("sh", &["-c", "command -v initctl"]).await {
        Ok(()) => Ok(Some(Arc::new(Upstart))),
        Err(_) => Ok(None),
    }
}

#[async_trait]
impl ServiceManager for Upstart {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("initctl", &["start", name]).await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("initctl", &["stop", name]).await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("initctl", &["restart", name]).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        // upstart has no enable verb; the convention is removing a
        // manual-start override file.
        runner
            .exec("sh", &["-c", &format!("rm -f /etc/init/{name}.override")])
            .await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec(
                "sh",
                &["-c", &format!("echo manual > /etc/init/{name}.override")],
            )
            .await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("initctl", &["status", name]).await?;
        Ok(out.success() && String::from_utf8_lossy(&out.stdout).contains("running"))
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/etc/init/{name}.conf")
    }

    fn label(&self) -> &'static str {
        "upstart"
    }
}
