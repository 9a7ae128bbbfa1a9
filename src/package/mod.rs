//! Package-manager backends: translate `Install`/`Remove`/`Update` into
//! the shell invocation a given package manager understands. Most
//! backends share one [`UniversalAdapter`] template; the handful that
//! don't (yum-vs-dnf precedence, apt's noninteractive env, the Windows
//! multi-manager aggregator) are implemented directly in this module.

mod windows;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::escape::escape_posix;
use crate::provider::Provider;
use crate::runner::Runner;

pub use windows::WindowsMultiManager;

/// Every package-manager backend implements this.
#[async_trait]
pub trait PackageManager: Send + Sync + std::fmt::Debug {
    async fn install(&self, runner: &Runner, pkgs: &[&str]) -> Result<()>;
    async fn remove(&self, runner: &Runner, pkgs: &[&str]) -> Result<()>;
    async fn update(&self, runner: &Runner, pkgs: &[&str]) -> Result<()>;

    /// Short label used in error messages and `Debug`.
    fn label(&self) -> &'static str;
}

/// `(name, executable, install-verb, remove-verb, update-verb)` — shared
/// by every backend whose install/remove/update shape is
/// `<exec> <verb> <shell-escaped pkg>...`.
#[derive(Debug, Clone, Copy)]
pub struct UniversalAdapter {
    name: &'static str,
    exec: &'static str,
    install_verb: &'static [&'static str],
    remove_verb: &'static [&'static str],
    update_verb: &'static [&'static str],
}

impl UniversalAdapter {
    const fn new(
        name: &'static str,
        exec: &'static str,
        install_verb: &'static [&'static str],
        remove_verb: &'static [&'static str],
        update_verb: &'static [&'static str],
    ) -> Self {
        UniversalAdapter {
            name,
            exec,
            install_verb,
            remove_verb,
            update_verb,
        }
    }

    async fn run(&self, runner: &Runner, verb: &[&str], pkgs: &[&str]) -> Result<()> {
        let mut args: Vec<&str> = verb.to_vec();
        args.extend_from_slice(pkgs);
        runner.exec(self.exec, &args).await
    }
}

#[async_trait]
impl PackageManager for UniversalAdapter {
    async fn install(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, self.install_verb, pkgs).await
    }

    async fn remove(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, self.remove_verb, pkgs).await
    }

    async fn update(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, self.update_verb, pkgs).await
    }

    fn label(&self) -> &'static str {
        self.name
    }
}

const APK: UniversalAdapter = UniversalAdapter::new("apk", "apk", &["add"], &["del"], &["update"]);
const PACMAN: UniversalAdapter =
    UniversalAdapter::new("pacman", "pacman", &["-S", "--noconfirm"], &["-R", "--noconfirm"], &["-Syu", "--noconfirm"]);
const ZYPPER: UniversalAdapter =
    UniversalAdapter::new("zypper", "zypper", &["install", "-y"], &["remove", "-y"], &["update", "-y"]);
const DNF: UniversalAdapter = UniversalAdapter::new("dnf", "dnf", &["install", "-y"], &["remove", "-y"], &["update", "-y"]);
const YUM: UniversalAdapter = UniversalAdapter::new("yum", "yum", &["install", "-y"], &["remove", "-y"], &["update", "-y"]);
const HOMEBREW: UniversalAdapter = UniversalAdapter::new("homebrew", "brew", &["install"], &["uninstall"], &["upgrade"]);
const MACPORTS: UniversalAdapter = UniversalAdapter::new("macports", "port", &["install"], &["uninstall"], &["upgrade"]);
const WINGET: UniversalAdapter = UniversalAdapter::new(
    "winget",
    "winget",
    &["install", "-e", "--accept-package-agreements", "--accept-source-agreements"],
    &["uninstall", "-e"],
    &["upgrade", "-e"],
);
const CHOCOLATEY: UniversalAdapter =
    UniversalAdapter::new("chocolatey", "choco", &["install", "-y"], &["uninstall", "-y"], &["upgrade", "-y"]);
const SCOOP: UniversalAdapter = UniversalAdapter::new("scoop", "scoop", &["install"], &["uninstall"], &["update"]);

/// apt needs `DEBIAN_FRONTEND=noninteractive APT_LISTCHANGES_FRONTEND=none`
/// prefixed onto every invocation, so it can't reuse [`UniversalAdapter::run`]
/// directly.
#[derive(Debug)]
pub(crate) struct Apt;

impl Apt {
    async fn run(&self, runner: &Runner, verb: &str, pkgs: &[&str]) -> Result<()> {
        let quoted: Vec<String> = pkgs.iter().map(|p| escape_posix(p).into_owned()).collect();
        let mut cmd = format!(
            "DEBIAN_FRONTEND=noninteractive APT_LISTCHANGES_FRONTEND=none apt-get {verb} -y"
        );
        for p in &quoted {
            cmd.push(' ');
            cmd.push_str(p);
        }
        runner.exec("sh", &["-c", &cmd]).await
    }
}

#[async_trait]
impl PackageManager for Apt {
    async fn install(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, "install", pkgs).await
    }

    async fn remove(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, "remove", pkgs).await
    }

    async fn update(&self, runner: &Runner, pkgs: &[&str]) -> Result<()> {
        self.run(runner, "update", pkgs).await
    }

    fn label(&self) -> &'static str {
        "apt"
    }
}

async fn has_exec(runner: &Runner, exec: &str) -> Result<bool> {
    match runner
        .exec("sh", &["-c", &format!("command -v {exec}")])
        .await
    {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

pub fn provider() -> Provider<Arc<Runner>, Arc<dyn PackageManager>> {
    let mut provider = Provider::new(Error::NoPackageManager);
    provider
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "apt-get").await? {
                    Ok(Some(Arc::new(Apt) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "apk").await? {
                    Ok(Some(Arc::new(APK) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            // dnf preferred: yum declines when dnf is also present.
            Box::pin(async move {
                if has_exec(&runner, "dnf").await? {
                    Ok(Some(Arc::new(DNF) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "dnf").await? {
                    return Ok(None);
                }
                if has_exec(&runner, "yum").await? {
                    Ok(Some(Arc::new(YUM) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "pacman").await? {
                    Ok(Some(Arc::new(PACMAN) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "zypper").await? {
                    Ok(Some(Arc::new(ZYPPER) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "brew").await? {
                    Ok(Some(Arc::new(HOMEBREW) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(async move {
                if has_exec(&runner, "port").await? {
                    Ok(Some(Arc::new(MACPORTS) as Arc<dyn PackageManager>))
                } else {
                    Ok(None)
                }
            })
        }))
        .register(Arc::new(|runner: Arc<Runner>| {
            Box::pin(windows::WindowsMultiManager::probe(runner))
        }));
    provider
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};
    use crate::transport::Transport;
    use std::time::Duration;

    async fn connected_mock() -> Arc<MockTransport> {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t
    }

    #[tokio::test]
    async fn apt_is_preferred_when_apt_get_is_present() {
        let t = connected_mock().await;
        t.on(
            "sh -c 'command -v apt-get'",
            ScriptedResponse::ok(b"/usr/bin/apt-get\n".to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let backend = provider().resolve(runner).await.unwrap();
        assert_eq!(backend.label(), "apt");
    }

    #[tokio::test]
    async fn dnf_shadows_yum_when_both_present() {
        let t = connected_mock().await;
        t.on(
            "sh -c 'command -v apt-get'",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on(
            "sh -c 'command -v apk'",
            ScriptedResponse::failure(1, Vec::new()),
        );
        t.on(
            "sh -c 'command -v dnf'",
            ScriptedResponse::ok(b"/usr/bin/dnf\n".to_vec()),
        );
        let runner = Arc::new(Runner::new(t));
        let backend = provider().resolve(runner).await.unwrap();
        assert_eq!(backend.label(), "dnf");
    }

    #[tokio::test]
    async fn apt_install_sets_noninteractive_env() {
        let t = connected_mock().await;
        t.on(
            "sh -c 'DEBIAN_FRONTEND=noninteractive APT_LISTCHANGES_FRONTEND=none apt-get install -y nginx'",
            ScriptedResponse::ok(Vec::new()),
        );
        let runner = Arc::new(Runner::new(t.clone()));
        Apt.install(&runner, &["nginx"]).await.unwrap();
        assert_eq!(
            t.calls().last().unwrap(),
            "sh -c 'DEBIAN_FRONTEND=noninteractive APT_LISTCHANGES_FRONTEND=none apt-get install -y nginx'"
        );
    }

    #[tokio::test]
    async fn no_manager_found_is_no_package_manager_error() {
        let t = connected_mock().await;
        let runner = Arc::new(Runner::new(t));
        let err = provider().resolve(runner).await.unwrap_err();
        assert!(matches!(err, Error::NoPackageManager));
    }
}
