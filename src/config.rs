use std::{fs::read_to_string, net::SocketAddr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Node {
    ///
    /// The address this node's TCP listener binds.
    ///
    pub listen: SocketAddr,
    ///
    /// The address peers should use to reach this node: specify this when
    /// `listen` is behind a NAT or load balancer.
    ///
    pub external: SocketAddr,
    ///
    /// Starting dimension. Normally `0` (an unattached node); only a node
    /// bootstrapping a cube alone would ever set this directly.
    ///
    #[serde(default)]
    pub dim: u32,
    ///
    /// Idle timeout, in seconds, for a link with no traffic.
    ///
    #[serde(default = "Node::idle_timeout")]
    pub idle_timeout: u32,
}

impl Node {
    fn idle_timeout() -> u32 {
        20
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Policy {
    ///
    /// Static deny-list backing the default `am_willing` (spec section 6
    /// "Policy surface"): candidates at these transport addresses are
    /// always refused.
    ///
    #[serde(default)]
    pub unwilling: Vec<SocketAddr>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub node: Node,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: cube-node --config /etc/cube-node/config.json5
    ///
    #[arg(long, short)]
    config: String,
}

impl Config {
    ///
    /// Load configuration from the file named on the command line.
    ///
    pub fn load() -> Result<Self> {
        Ok(serde_json5::from_str::<Self>(&read_to_string(
            &Cli::parse().config,
        )?)?)
    }
}
