//! Node configuration, read from two TOML files.
//!
//! The general file describes this node, the network file lists the peers it
//! may connect to.

use crate::types::Address;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("alias must not be empty")]
    MissingAlias,
    #[error("invalid perun_id")]
    OwnId(#[source] hex::FromHexError),
    #[error("invalid perun_id of peer '{alias}'")]
    PeerId {
        alias: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("port of {0} must not be zero")]
    ZeroPort(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    alias: String,
    perun_id: String,
    channel: ChannelFile,
    node: NodeFile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChannelFile {
    timeout_secs: u64,
    fund_timeout_secs: u64,
    settle_timeout_secs: u64,
    challenge_duration_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeFile {
    ip: String,
    port: u16,
    dial_timeout_secs: u64,
    handle_timeout_secs: u64,
    reconnect_timeout_secs: u64,
    #[serde(default)]
    persistence_path: PathBuf,
    #[serde(default)]
    persistence_enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkFile {
    #[serde(default)]
    peers: BTreeMap<String, PeerFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PeerFile {
    perun_id: String,
    hostname: String,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub alias: String,
    pub perun_id: Address,
    pub channel: ChannelConfig,
    pub node: NodeConfig,
    /// Known peers by alias, may contain this node itself.
    pub peers: BTreeMap<String, Peer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Bound for sending, accepting and rejecting updates.
    pub timeout: Duration,
    pub fund_timeout: Duration,
    pub settle_timeout: Duration,
    pub challenge_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    pub dial_timeout: Duration,
    /// How long an incoming channel proposal waits for the user.
    pub handle_timeout: Duration,
    pub reconnect_timeout: Duration,
    pub persistence_path: PathBuf,
    pub persistence_enabled: bool,
}

impl NodeConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub perun_id: Address,
    pub hostname: String,
    pub port: u16,
}

impl Peer {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_owned(),
        source,
    })
}

fn parse<T: for<'de> Deserialize<'de>>(path: &Path, s: &str) -> Result<T, ConfigError> {
    toml::from_str(s).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn secs(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    match secs {
        0 => Err(ConfigError::ZeroTimeout(name)),
        s => Ok(Duration::from_secs(s)),
    }
}

impl Config {
    /// Reads and validates both files.
    pub fn load(config: &Path, network: &Path) -> Result<Self, ConfigError> {
        let cfg: ConfigFile = parse(config, &read(config)?)?;
        let net: NetworkFile = parse(network, &read(network)?)?;
        Self::build(cfg, net)
    }

    /// Like [Config::load] but from the file contents.
    pub fn from_toml(config: &str, network: &str) -> Result<Self, ConfigError> {
        let cfg = parse(Path::new("<config>"), config)?;
        let net = parse(Path::new("<network>"), network)?;
        Self::build(cfg, net)
    }

    fn build(cfg: ConfigFile, net: NetworkFile) -> Result<Self, ConfigError> {
        if cfg.alias.trim().is_empty() {
            return Err(ConfigError::MissingAlias);
        }
        if cfg.node.port == 0 {
            return Err(ConfigError::ZeroPort(cfg.alias));
        }

        let mut peers = BTreeMap::new();
        for (alias, p) in net.peers {
            if p.port == 0 {
                return Err(ConfigError::ZeroPort(alias));
            }
            let perun_id = match p.perun_id.parse() {
                Ok(id) => id,
                Err(source) => return Err(ConfigError::PeerId { alias, source }),
            };
            peers.insert(
                alias,
                Peer {
                    perun_id,
                    hostname: p.hostname,
                    port: p.port,
                },
            );
        }

        Ok(Self {
            perun_id: cfg.perun_id.parse().map_err(ConfigError::OwnId)?,
            channel: ChannelConfig {
                timeout: secs("channel.timeout_secs", cfg.channel.timeout_secs)?,
                fund_timeout: secs("channel.fund_timeout_secs", cfg.channel.fund_timeout_secs)?,
                settle_timeout: secs(
                    "channel.settle_timeout_secs",
                    cfg.channel.settle_timeout_secs,
                )?,
                challenge_duration: cfg.channel.challenge_duration_secs,
            },
            node: NodeConfig {
                ip: cfg.node.ip,
                port: cfg.node.port,
                dial_timeout: secs("node.dial_timeout_secs", cfg.node.dial_timeout_secs)?,
                handle_timeout: secs("node.handle_timeout_secs", cfg.node.handle_timeout_secs)?,
                reconnect_timeout: secs(
                    "node.reconnect_timeout_secs",
                    cfg.node.reconnect_timeout_secs,
                )?,
                persistence_path: cfg.node.persistence_path,
                persistence_enabled: cfg.node.persistence_enabled,
            },
            alias: cfg.alias,
            peers,
        })
    }

    /// Peers other than this node.
    pub fn remote_peers(&self) -> impl Iterator<Item = (&String, &Peer)> {
        self.peers.iter().filter(move |(alias, _)| **alias != self.alias)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Alias: {}", self.alias)?;
        writeln!(f, "Listening: {}", self.node.listen_addr())?;
        writeln!(f, "Perun ID: {:?}", self.perun_id)?;
        write!(f, "Known peers:")?;
        for (alias, peer) in &self.peers {
            write!(f, "\n  {}\t{:?}\t{}", alias, peer.perun_id, peer.addr())?;
        }
        Ok(())
    }
}
