use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::ServiceManager;

#[derive(Debug)]
pub(super) struct WinSvc;

pub(super) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn ServiceManager>>> {
    if runner.transport().is_windows().await? {
        Ok(Some(Arc::new(WinSvc)))
    } else {
        Ok(None)
    }
}

#[async_trait]
impl ServiceManager for WinSvc {
    async fn start(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("powershell", &["-Command", &format!("Start-Service -Name '{name}'")])
            .await
    }

    async fn stop(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("powershell", &["-Command", &format!("Stop-Service -Name '{name}'")])
            .await
    }

    async fn restart(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec("powershell", &["-Command", &format!("Restart-Service -Name '{name}'")])
            .await
    }

    async fn enable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec(
                "powershell",
                &[
                    "-Command",
                    &format!("Set-Service -Name '{name}' -StartupType Automatic"),
                ],
            )
            .await
    }

    async fn disable(&self, runner: &Runner, name: &str) -> Result<()> {
        runner
            .exec(
                "powershell",
                &[
                    "-Command",
                    &format!("Set-Service -Name '{name}' -StartupType Disabled"),
                ],
            )
            .await
    }

    async fn is_running(&self, runner: &Runner, name: &str) -> Result<bool> {
        let out = runner
            .exec_output(
                "powershell",
                &[
                    "-Command",
                    &format!("(Get-Service -Name '{name}').Status"),
                ],
            )
            .await?;
        Ok(out.success() && String::from_utf8_lossy(&out.stdout).trim() == "Running")
    }

    async fn script_path(&self, name: &str) -> String {
        format!(r"HKLM:\SYSTEM\CurrentControlSet\Services\{name}")
    }

    fn label(&self) -> &'static str {
        "winsvc"
    }
}
