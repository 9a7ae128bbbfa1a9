use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::ServiceManager;

/// sysvinit's accept probe is the one in the table that depends on the
/// service name: `stat /etc/init.d/<name>`.
#[derive(Debug)]
pub(super) struct SysVInit;

pub(super) async fn probe(
    runner: Arc<Runner>,
    name: Arc<str>,
) -> Result<Option<Arc<dyn ServiceManager>>> {
    let path = format!("/etc/init.d/{name}");
    match runner.exec_output("stat", &[path.as_str()]).await {
        Ok(out) if out.success() => Ok(Some(Arc::new(SysVInit))),
        _ => Ok(None),
    }
}

#[async_trait]
impl ServiceManager for SysVInit {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("service", &[name, "start"]).await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("service", &[name, "stop"]).await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("service", &[name, "restart"]).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("update-rc.d", &[name, "defaults"]).await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("update-rc.d", &[name, "remove"]).await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("service", &[name, "status"]).await?;
        Ok(out.success())
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/etc/init.d/{name}")
    }

    fn label(&self) -> &'static str {
        "sysvinit"
    }
}
