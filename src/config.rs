//! Declarative host configuration.
//!
//! These types carry exactly one `#[derive(Deserialize)]` and nothing more:
//! `rig` never parses YAML (or any other config format) itself. Callers
//! that keep a fleet inventory in YAML/TOML/JSON deserialize into
//! [`HostConfig`] with whatever crate they already use and hand the result
//! to [`crate::Client::connect`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::transport::{Endpoint, OpenSshConfig, SshConfig, TransportConfig, WinRmConfig};

/// One host's worth of configuration: exactly one transport, plus
/// whatever defaults the caller wants applied once connected.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// A caller-facing name for logging; not used for addressing.
    pub name: String,
    /// Exactly one of these must be `Some`.
    #[serde(flatten)]
    pub transport: TransportSection,
    /// Seconds to wait for `connect` before giving up. Defaults to 30.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl HostConfig {
    /// Resolve the `transport` section into a single [`TransportConfig`],
    /// failing if zero or more than one variant is populated.
    pub fn transport_config(&self) -> Result<TransportConfig> {
        let mut configured = Vec::new();
        if self.transport.ssh.is_some() {
            configured.push("ssh");
        }
        if self.transport.openssh.is_some() {
            configured.push("openssh");
        }
        if self.transport.winrm.is_some() {
            configured.push("winrm");
        }
        if self.transport.localhost.as_ref().is_some_and(LocalSpec::is_enabled) {
            configured.push("local");
        }

        match configured.len() {
            0 => Err(Error::ValidationFailed(
                "host config names no transport (expected exactly one of ssh/openssh/winrm/local)"
                    .into(),
            )),
            1 => {
                let cfg = if let Some(c) = &self.transport.ssh {
                    TransportConfig::Ssh(c.clone().into())
                } else if let Some(c) = &self.transport.openssh {
                    TransportConfig::OpenSsh(c.clone().into())
                } else if let Some(c) = &self.transport.winrm {
                    TransportConfig::WinRm(c.clone().into())
                } else {
                    TransportConfig::Local
                };
                cfg.validate()?;
                Ok(cfg)
            }
            _ => Err(Error::ValidationFailed(format!(
                "host config names more than one transport: {}",
                configured.join(", ")
            ))),
        }
    }
}

/// The raw, all-optional shape deserialized directly from config data.
/// [`HostConfig::transport_config`] enforces "exactly one populated".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportSection {
    pub ssh: Option<SshSpec>,
    pub openssh: Option<OpenSshSpec>,
    pub winrm: Option<WinRmSpec>,
    pub localhost: Option<LocalSpec>,
}

/// `localhost` accepts both the bare-boolean shorthand (`localhost: true`)
/// and the object form (`localhost: { enabled: true }`) spec §6 requires.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocalSpec {
    Bool(bool),
    Object { enabled: bool },
}

impl LocalSpec {
    fn is_enabled(&self) -> bool {
        match self {
            LocalSpec::Bool(b) => *b,
            LocalSpec::Object { enabled } => *enabled,
        }
    }
}

/// On-disk shape of an SSH endpoint, mirroring [`SshConfig`] field for
/// field but with a plain `host`/`port` pair instead of an [`Endpoint`]
/// and a default port.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSpec {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub bastion: Option<Box<SshSpec>>,
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub keepalive: bool,
}

fn default_ssh_port() -> u16 {
    22
}

impl From<SshSpec> for SshConfig {
    fn from(s: SshSpec) -> Self {
        SshConfig {
            endpoint: Endpoint::new(s.host, s.port),
            user: s.user,
            key_path: s.key_path,
            bastion: s.bastion.map(|b| Box::new(SshConfig::from(*b))),
            config_path: s.config_path,
            keepalive: s.keepalive,
        }
    }
}

/// On-disk shape of an OpenSSH (subprocess) endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenSshSpec {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub disable_multiplexing: bool,
}

impl From<OpenSshSpec> for OpenSshConfig {
    fn from(s: OpenSshSpec) -> Self {
        OpenSshConfig {
            endpoint: Endpoint::new(s.host, s.port),
            user: s.user,
            key_path: s.key_path,
            config_path: s.config_path,
            options: s.options,
            disable_multiplexing: s.disable_multiplexing,
        }
    }
}

/// On-disk shape of a WinRM endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WinRmSpec {
    pub host: String,
    #[serde(default = "default_winrm_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub use_https: bool,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub use_ntlm: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub tls_server_name: Option<String>,
    pub bastion: Option<SshSpec>,
}

fn default_winrm_port() -> u16 {
    5985
}

impl From<WinRmSpec> for WinRmConfig {
    fn from(s: WinRmSpec) -> Self {
        WinRmConfig {
            endpoint: Endpoint::new(s.host, s.port),
            user: s.user,
            password: s.password,
            use_https: s.use_https,
            insecure: s.insecure,
            use_ntlm: s.use_ntlm,
            ca_cert_path: s.ca_cert_path,
            cert_path: s.cert_path,
            key_path: s.key_path,
            tls_server_name: s.tls_server_name,
            bastion: s.bastion.map(SshConfig::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_host_with_no_transport() {
        let cfg = HostConfig {
            name: "web1".into(),
            transport: TransportSection::default(),
            connect_timeout_secs: 30,
        };
        assert!(cfg.transport_config().is_err());
    }

    #[test]
    fn rejects_host_with_two_transports() {
        let cfg = HostConfig {
            name: "web1".into(),
            transport: TransportSection {
                ssh: Some(SshSpec {
                    host: "h".into(),
                    port: 22,
                    user: "u".into(),
                    key_path: None,
                    bastion: None,
                    config_path: None,
                    keepalive: false,
                }),
                localhost: Some(LocalSpec::Bool(true)),
                ..Default::default()
            },
            connect_timeout_secs: 30,
        };
        assert!(cfg.transport_config().is_err());
    }

    #[test]
    fn localhost_bare_bool_is_accepted() {
        let cfg: HostConfig = serde_yaml::from_str("name: web1\nlocalhost: true\n").unwrap();
        assert!(matches!(cfg.transport_config().unwrap(), TransportConfig::Local));
    }

    #[test]
    fn localhost_object_form_is_accepted() {
        let cfg: HostConfig =
            serde_yaml::from_str("name: web1\nlocalhost:\n  enabled: true\n").unwrap();
        assert!(matches!(cfg.transport_config().unwrap(), TransportConfig::Local));
    }

    #[test]
    fn localhost_object_form_disabled_is_not_a_transport() {
        let cfg: HostConfig =
            serde_yaml::from_str("name: web1\nlocalhost:\n  enabled: false\n").unwrap();
        assert!(cfg.transport_config().is_err());
    }

    #[test]
    fn yaml_round_trip_matches_explicit_construction() {
        let yaml = r#"
name: web1
ssh:
  host: web1.example.com
  user: deploy
  key_path: /home/deploy/.ssh/id_ed25519
"#;
        let cfg: HostConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.name, "web1");
        let transport = cfg.transport_config().unwrap();
        match transport {
            TransportConfig::Ssh(s) => {
                assert_eq!(s.endpoint, Endpoint::new("web1.example.com", 22));
                assert_eq!(s.user, "deploy");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
