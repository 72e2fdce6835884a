//! Configuration system.
//!
//! Both binaries take positional arguments; the structs can also be loaded
//! from JSON strings (file IO left to the app).

use std::net::{IpAddr, SocketAddr};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Server process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP port to listen on.
    pub port: u16,
    /// Round duration in seconds.
    #[serde(default = "default_round_secs")]
    pub round_secs: u64,
    /// Simulated egress loss probability.
    #[serde(default)]
    pub loss_prob: f64,
}

fn default_round_secs() -> u64 {
    10
}

impl ServerConfig {
    /// Parses `<port> [round_secs] [loss_prob]` (arguments after the
    /// program name).
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let port = args
            .first()
            .context("missing server port")?
            .parse()
            .context("parse server port")?;
        let round_secs = match args.get(1) {
            Some(raw) => raw.parse().context("parse round duration")?,
            None => default_round_secs(),
        };
        let loss_prob = match args.get(2) {
            Some(raw) => raw.parse().context("parse loss probability")?,
            None => 0.0,
        };
        Ok(Self {
            port,
            round_secs,
            loss_prob,
        })
    }

    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

/// Client process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host, e.g. `127.0.0.1`.
    pub server_ip: String,
    /// Server UDP port.
    pub server_port: u16,
    /// Local UDP port to bind.
    pub local_port: u16,
    /// Simulated egress loss probability.
    #[serde(default)]
    pub loss_prob: f64,
}

impl ClientConfig {
    /// Parses `<server_ip> <server_port> <local_port> [loss_prob]`
    /// (arguments after the program name).
    pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
        let server_ip = args.first().context("missing server ip")?.clone();
        server_ip
            .parse::<IpAddr>()
            .context("parse server ip")?;
        let server_port = args
            .get(1)
            .context("missing server port")?
            .parse()
            .context("parse server port")?;
        let local_port = args
            .get(2)
            .context("missing local port")?
            .parse()
            .context("parse local port")?;
        let loss_prob = match args.get(3) {
            Some(raw) => raw.parse().context("parse loss probability")?,
            None => 0.0,
        };
        Ok(Self {
            server_ip,
            server_port,
            local_port,
            loss_prob,
        })
    }

    /// The server address commands are sent to.
    pub fn server_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self.server_ip.parse().context("parse server ip")?;
        Ok(SocketAddr::new(ip, self.server_port))
    }

    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
