//! `Client`: one connected host, composing a [`Runner`] with the lazily-
//! detected capability surfaces layered on top of it.
//!
//! Grounded on the teacher's `Session` (one struct, many accessors over a
//! single connection) and `SessionBuilder::resolve` (clone-then-override,
//! reused here for `sudo()`'s cached-clone-with-a-decorator shape).

use std::sync::Arc;
use std::time::Duration;

use crate::config::HostConfig;
use crate::error::Result;
use crate::fs::{self, RemoteFs};
use crate::os_release::{self, OsRelease};
use crate::package::{self, PackageManager};
use crate::provider::{LazyService, Null};
use crate::runner::Runner;
use crate::service::{self, ServiceManager};
use crate::sudo::{self, Strategy};
use crate::transport::{self, Transport, TransportConfig};

/// One connected host. Owns the transport and a [`Runner`] on top of it,
/// and lazily resolves/memoizes the package manager, init system, remote
/// filesystem, OS release, and privilege-elevation strategy appropriate
/// to this host.
pub struct Client {
    runner: Arc<Runner>,
    name: String,
    package_manager: LazyService<dyn PackageManager>,
    os_release: LazyService<OsRelease>,
    fs: LazyService<dyn RemoteFs>,
    sudo_client: tokio::sync::OnceCell<Arc<Client>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("protocol", &self.runner.transport().protocol())
            .field("address", &self.runner.transport().address())
            .finish()
    }
}

impl Client {
    /// Build and connect a client directly from a [`TransportConfig`],
    /// bypassing [`HostConfig`]'s YAML-oriented shape.
    pub async fn connect(config: TransportConfig) -> Result<Self> {
        Self::connect_with_timeout(config, Duration::from_secs(30), "").await
    }

    /// Build and connect from a [`HostConfig`], applying its
    /// `connect_timeout_secs`.
    pub async fn connect_host(config: HostConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let name = config.name.clone();
        let transport_config = config.transport_config()?;
        Self::connect_with_timeout(transport_config, timeout, &name).await
    }

    async fn connect_with_timeout(
        config: TransportConfig,
        timeout: Duration,
        name: &str,
    ) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::from(transport::build(&config)?);
        transport.connect(timeout).await?;
        let runner = Arc::new(Runner::new(transport));
        Ok(Client {
            runner,
            name: name.to_string(),
            package_manager: LazyService::new(),
            os_release: LazyService::new(),
            fs: LazyService::new(),
            sudo_client: tokio::sync::OnceCell::new(),
        })
    }

    fn from_runner(runner: Arc<Runner>, name: String) -> Self {
        Client {
            runner,
            name,
            package_manager: LazyService::new(),
            os_release: LazyService::new(),
            fs: LazyService::new(),
            sudo_client: tokio::sync::OnceCell::new(),
        }
    }

    /// Build a client directly from an already-connected [`Runner`],
    /// bypassing [`Client::connect`]'s transport construction. Exposed
    /// only so downstream integration tests can exercise a `Client` on
    /// top of a [`crate::transport::mock::MockTransport`].
    #[cfg(any(test, feature = "testing"))]
    pub fn from_runner_for_tests(runner: Arc<Runner>, name: String) -> Self {
        Self::from_runner(runner, name)
    }

    /// The caller-facing name this client was constructed with (empty
    /// when built via [`Client::connect`] rather than [`Client::connect_host`]).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short protocol label (`"SSH"`, `"OpenSSH"`, `"WinRM"`, `"Local"`).
    pub fn protocol(&self) -> &'static str {
        self.runner.transport().protocol()
    }

    /// The dialed address, for display purposes.
    pub fn address(&self) -> &str {
        self.runner.transport().address()
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.runner.transport().disconnect().await
    }

    /// The underlying command runner, for operations not covered by any
    /// of the capability accessors below.
    pub fn runner(&self) -> &Arc<Runner> {
        &self.runner
    }

    /// Resolve (and memoize) this host's package manager, surfacing the
    /// detection failure immediately if none was found.
    pub async fn try_package_manager(&self) -> Result<Arc<dyn PackageManager>> {
        let runner = self.runner.clone();
        self.package_manager
            .get_or_try_init(|| async move { package::provider().resolve(runner).await })
            .await
    }

    /// Infallible counterpart to [`Client::try_package_manager`]: never
    /// errors up front, carries the detection failure into whichever
    /// operation is attempted through it instead.
    pub async fn package_manager(&self) -> Null<dyn PackageManager> {
        let runner = self.runner.clone();
        self.package_manager
            .get_or_null("package_manager", || async move {
                package::provider().resolve(runner).await
            })
            .await
    }

    /// Resolve a [`crate::service::Service`] handle for `name`, detecting
    /// (but not memoizing — the init system is host-wide but the probe is
    /// cheap, and the service name varies per call) the backend fresh.
    pub async fn service(&self, name: impl Into<String>) -> Result<crate::service::Service> {
        let name = name.into();
        let runner = self.runner.clone();
        let backend: Arc<dyn ServiceManager> = service::provider()
            .resolve((runner, Arc::from(name.as_str())))
            .await?;
        Ok(crate::service::Service::new(self.runner.clone(), backend, name))
    }

    /// Resolve (and memoize) this host's OS release information.
    pub async fn try_os_release(&self) -> Result<Arc<OsRelease>> {
        let runner = self.runner.clone();
        self.os_release
            .get_or_try_init(|| async move { os_release::detect(runner).await.map(Arc::new) })
            .await
    }

    pub async fn os_release(&self) -> Null<OsRelease> {
        let runner = self.runner.clone();
        self.os_release
            .get_or_null("os_release", || async move {
                os_release::detect(runner).await.map(Arc::new)
            })
            .await
    }

    /// Resolve (and memoize) this host's remote filesystem driver.
    pub async fn try_fs(&self) -> Result<Arc<dyn RemoteFs>> {
        let runner = self.runner.clone();
        self.fs
            .get_or_try_init(|| async move { fs::driver(runner).await })
            .await
    }

    pub async fn fs(&self) -> Null<dyn RemoteFs> {
        let runner = self.runner.clone();
        self.fs
            .get_or_null("fs", || async move { fs::driver(runner).await })
            .await
    }

    /// A privilege-elevated clone of this client: same transport, same
    /// underlying connection (disconnecting either disconnects both,
    /// since they share the one `Arc<dyn Transport>`), but every command
    /// the returned client's `Runner` sends is wrapped in `sudo`/`doas`/
    /// `runas`. Detection happens once; repeated calls return the same
    /// cached `Arc<Client>`.
    pub async fn sudo(&self) -> Result<Arc<Client>> {
        if let Some(existing) = self.sudo_client.get() {
            return Ok(existing.clone());
        }
        let (_strategy, decorator) = sudo::detect(&self.runner).await?;
        let elevated_runner = Arc::new(self.runner.with_decorator(decorator));
        let client = Arc::new(Client::from_runner(elevated_runner, self.name.clone()));
        Ok(self.sudo_client.get_or_init(|| async { client }).await.clone())
    }

    /// Which elevation strategy `sudo()` would use, without caching a
    /// whole elevated client — useful for display/logging.
    pub async fn sudo_strategy(&self) -> Result<Strategy> {
        sudo::detect(&self.runner).await.map(|(s, _)| s)
    }
}

impl std::fmt::Display for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}://{}", self.protocol(), self.address())
        } else {
            write!(f, "{} ({}://{})", self.name, self.protocol(), self.address())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, ScriptedResponse};

    async fn connected_mock() -> Arc<MockTransport> {
        let t = Arc::new(MockTransport::new(false));
        t.connect(Duration::from_secs(1)).await.unwrap();
        t
    }

    fn client_on(transport: Arc<MockTransport>) -> Client {
        let runner = Arc::new(Runner::new(transport));
        Client::from_runner(runner, "test-host".into())
    }

    #[tokio::test]
    async fn connect_then_disconnect_round_trips() {
        let t = connected_mock().await;
        let client = client_on(t);
        assert!(client.runner.transport().is_connected());
        client.disconnect().await.unwrap();
        assert!(!client.runner.transport().is_connected());
    }

    #[tokio::test]
    async fn display_includes_name_and_protocol() {
        let t = connected_mock().await;
        let client = client_on(t);
        assert_eq!(format!("{client}"), "test-host (Mock://mock)");
    }

    #[tokio::test]
    async fn sudo_client_identity_is_stable_across_calls() {
        let t = connected_mock().await;
        t.on("sudo -n true", ScriptedResponse::ok(Vec::new()));
        let client = client_on(t);

        let first = client.sudo().await.unwrap();
        let second = client.sudo().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
