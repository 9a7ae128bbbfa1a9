use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::{EnvFileWriter, ServiceManager};

#[derive(Debug)]
pub(super) struct OpenRc;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    if runner.exec("sh", &["-c", "command -v openrc-init"]).await.is_ok() {
        return Ok(Some(Arc::new(OpenRc)));
    }
    if runner
        .exec("sh", &["-c", "grep -q sysinit /etc/inittab"])
        .await
        .is_ok()
    {
        return Ok(Some(Arc::new(OpenRc)));
    }
    Ok(None)
}

#[async_trait]
impl ServiceManager for OpenRc {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("rc-service", &[name, "start"]).await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("rc-service", &[name, "stop"]).await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("rc-service", &[name, "restart"]).await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("rc-update", &["add", name]).await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner.exec("rc-update", &["del", name]).await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner.exec_output("rc-service", &[name, "status"]).await?;
        Ok(out.success())
    }

    async fn script_path(&self, name: &str) -> String {
        format!("/etc/init.d/{name}")
    }

    fn label(&self) -> &'static str {
        "openrc"
    }
}

impl EnvFileWriter for OpenRc {
    fn env_file_path(&self, name: &str) -> String {
        format!("/etc/conf.d/{name}")
    }

    fn render_env_file(&self, vars: &[(String, String)]) -> String {
        vars.iter()
            .map(|(k, v)| format!("export {k}=\"{v}\"\n"))
            .collect()
    }
}
