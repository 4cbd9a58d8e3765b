//! Configuration for a MeshPay node.
//!
//! A JSON config file (selected by `--config` / `CONFIG`) declares the
//! node's identity, role, committee roster, and optional opening balances.
//! Mesh tuning knobs fall back to protocol defaults via serde.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::types::{Address, NodeRole};

/// Lower bound of the port band carrying votes and certificates. The
/// external QoS collaborator classifies this band as highest priority.
pub const BCB_PORT_MIN: u16 = 8001;
/// Upper bound of the vote/certificate port band.
pub const BCB_PORT_MAX: u16 = 8099;
/// Lower bound of the payment-data port band.
pub const PAYMENT_PORT_MIN: u16 = 9001;
/// Upper bound of the payment-data port band.
pub const PAYMENT_PORT_MAX: u16 = 9099;

/// CLI arguments for the node daemon.
#[derive(Parser, Debug)]
#[command(name = "meshpay")]
#[command(about = "MeshPay mesh settlement node")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "meshpay.json")]
    config: PathBuf,
}

/// Mesh protocol tuning knobs, all optional in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Maximum hops a relay bundle may traverse.
    #[serde(default = "mesh_defaults::relay_ttl")]
    pub relay_ttl: u8,
    /// Seconds between presence beacons.
    #[serde(default = "mesh_defaults::discovery_interval")]
    pub discovery_interval: f64,
    /// Seconds of silence before a neighbor is evicted.
    #[serde(default = "mesh_defaults::neighbor_timeout")]
    pub neighbor_timeout: f64,
    /// Seconds between buffered-transaction retry passes.
    #[serde(default = "mesh_defaults::retry_interval")]
    pub retry_interval: f64,
    /// Seconds a stored-and-carried bundle survives before being dropped.
    #[serde(default = "mesh_defaults::relay_bundle_max_age")]
    pub relay_bundle_max_age: f64,
    /// UDP port shared by the whole fleet for discovery beacons.
    #[serde(default = "mesh_defaults::discovery_port")]
    pub discovery_port: u16,
}

mod mesh_defaults {
    pub fn relay_ttl() -> u8 {
        8
    }
    pub fn discovery_interval() -> f64 {
        5.0
    }
    pub fn neighbor_timeout() -> f64 {
        15.0
    }
    pub fn retry_interval() -> f64 {
        5.0
    }
    pub fn relay_bundle_max_age() -> f64 {
        120.0
    }
    pub fn discovery_port() -> u16 {
        8888
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        MeshConfig {
            relay_ttl: mesh_defaults::relay_ttl(),
            discovery_interval: mesh_defaults::discovery_interval(),
            neighbor_timeout: mesh_defaults::neighbor_timeout(),
            retry_interval: mesh_defaults::retry_interval(),
            relay_bundle_max_age: mesh_defaults::relay_bundle_max_age(),
            discovery_port: mesh_defaults::discovery_port(),
        }
    }
}

/// An opening balance for one account, applied at authority startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    pub account: String,
    pub token_symbol: String,
    pub token_address: String,
    pub amount: f64,
}

/// Full node configuration as loaded from the JSON config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    node_id: String,
    role: NodeRole,
    #[serde(default = "config_defaults::host")]
    host: IpAddr,
    #[serde(default = "config_defaults::port")]
    port: u16,
    /// Secret material for the placeholder signer.
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    committee: Vec<Address>,
    #[serde(default)]
    funding: Vec<FundingConfig>,
    #[serde(default)]
    mesh: MeshConfig,
}

mod config_defaults {
    use std::net::{IpAddr, Ipv4Addr};

    pub fn host() -> IpAddr {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }

    pub fn port() -> u16 {
        super::PAYMENT_PORT_MIN
    }
}

/// Failure to load or parse the config file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("can not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Config {
    /// Load configuration from the file named on the command line.
    pub fn load() -> Result<Self, ConfigError> {
        let args = CliArgs::parse();
        Self::from_file(&args.config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secret(&self) -> String {
        self.secret
            .clone()
            .unwrap_or_else(|| format!("secret-{}", self.node_id))
    }

    pub fn committee(&self) -> &[Address] {
        &self.committee
    }

    pub fn funding(&self) -> &[FundingConfig] {
        &self.funding
    }

    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    /// The node's own address record as advertised in beacons.
    pub fn address(&self) -> Address {
        Address::new(self.node_id.clone(), self.host, self.port, self.role)
    }
}
