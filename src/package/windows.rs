//! The Windows side of package management has three competing managers
//! with no single dominant one; `WindowsMultiManager` tries each in turn
//! per operation instead of picking one at detection time.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::runner::Runner;

use super::PackageManager;

const BACKENDS: &[(&str, &[&str], &[&str], &[&str])] = &[
    (
        "winget",
        &["install", "-e", "--accept-package-agreements", "--accept-source-agreements"],
        &["uninstall", "-e"],
        &["upgrade", "-e"],
    ),
    ("choco", &["install", "-y"], &["uninstall", "-y"], &["upgrade", "-y"]),
    ("scoop", &["install"], &["uninstall"], &["update"]),
];

#[derive(Debug)]
pub struct WindowsMultiManager;

impl WindowsMultiManager {
    pub(crate) async fn probe(runner: Arc<Runner>) -> Result<Option<Arc<dyn PackageManager>>> {
        if !runner.transport().is_windows().await? {
            return Ok(None);
        }
        Ok(Some(Arc::new(WindowsMultiManager) as Arc<dyn PackageManager>))
    }

    /// Try every backend in order for one package, remembering the last
    /// error and surfacing it only if all backends decline or fail.
    async fn try_each(&self, runner: &Runner, pkg: &str, verb_index: usize) -> Result<()> {
        let mut last_err = None;
        for (exec, install_verb, remove_verb, update_verb) in BACKENDS {
            let verb: &[&str] = match verb_index {
                0 => install_verb,
                1 => remove_verb,
                _ => update_verb,
            };
            let mut args: Vec<&str> = verb.to_vec();
            args.push(pkg);
            match runner.exec(exec, &args).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(crate::error::Error::NoPackageManager))
    }
}

#[async_trait]
impl PackageManager for WindowsMultiManager {
    async fn install(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        for pkg in pkgs {
            self.try_each(runner, pkg, 0).await?;
        }
        Ok(())
    }

    async fn remove(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        for pkg in pkgs {
            self.try_each(runner, pkg, 1).await?;
        }
        Ok(())
    }

    async fn update(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        // Update runs on every backend regardless of pkg list, returning
        // the last error if any backend fails.
        let _ = pkgs;
        let mut last_err = None;
        for (exec, _, _, update_verb) in BACKENDS {
            if let Err(e) = runner.exec(exec, update_verb).await {
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn label(&self) -> &'static str {
        "windows-multi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};
    use crate::transport::Transport;
    use std::time::Duration;

    #[tokio::test]
    async fn install_falls_through_to_next_backend_on_failure() {
        let t = Arc::new(MockTransport::new(true));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t.on(
            "winget install -e --accept-package-agreements --accept-source-agreements nginx",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on("choco install -y nginx", ScriptedResponse::ok(Vec::new()));
        let runner = Arc::new(Runner::new(t));
        WindowsMultiManager.install(&runner, &["nginx"]).await.unwrap();
    }
}
