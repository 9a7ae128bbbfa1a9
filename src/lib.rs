//! `rig` gives callers a uniform surface for executing commands, moving
//! bytes, detecting the operating system and its native subsystems, and
//! running privilege-elevated variants of all of the above, across a fleet
//! of heterogeneous hosts reachable via different wire protocols.
//!
//! A [`Client`] is built from a [`config::HostConfig`] (or directly from a
//! [`transport::TransportConfig`]), owns exactly one [`transport::Transport`]
//! and one [`runner::Runner`], and lazily exposes [`service`], [`package`],
//! [`fs`], [`os_release`], and [`sudo`] backends appropriate for the
//! connected host.
//!
//! ```no_run
//! # async fn demo() -> rig::Result<()> {
//! use rig::{Client, transport::TransportConfig};
//!
//! let client = Client::connect(TransportConfig::local()).await?;
//! let out = client.runner().exec_output("uname", &["-a"]).await?;
//! println!("{}", String::from_utf8_lossy(&out.stdout));
//! # Ok(())
//! # }
//! ```

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod client;
pub mod config;
pub mod error;
pub mod escape;
pub mod fs;
pub mod os_release;
pub mod package;
pub mod provider;
pub mod runner;
pub mod service;
pub mod sudo;
pub mod transport;

pub use client::Client;
pub use error::{Error, Result};
