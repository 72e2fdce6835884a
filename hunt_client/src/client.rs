//! Client implementation.
//!
//! The client owns one reliable endpoint and talks to a single server.
//! Commands go out through the blocking reliable send; a background reader
//! task keeps polling so broadcasts are acked and printed even while the
//! console sits idle. The transport is symmetric, so both sides share the
//! endpoint through `Arc` and the transport's internal lock.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hunt_shared::config::ClientConfig;
use hunt_shared::transport::{ReliableEndpoint, TransportConfig};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// How long each background poll waits; also bounds shutdown latency.
const READER_POLL: Duration = Duration::from_millis(500);

/// Console client for the treasure-hunt server.
#[derive(Clone)]
pub struct HuntClient {
    transport: Arc<ReliableEndpoint>,
    server: SocketAddr,
    stop: Arc<AtomicBool>,
}

impl HuntClient {
    /// Binds the local endpoint and fixes the server address.
    pub async fn bind(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let server = cfg.server_addr()?;
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cfg.local_port);
        let transport = ReliableEndpoint::bind(local, TransportConfig::with_loss(cfg.loss_prob))
            .await
            .context("bind client endpoint")?;
        info!(%server, local_port = cfg.local_port, loss = cfg.loss_prob, "client ready");
        Ok(Self {
            transport: Arc::new(transport),
            server,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The underlying endpoint, for tests that drive the wire directly.
    pub fn endpoint(&self) -> &ReliableEndpoint {
        &self.transport
    }

    /// Sends one command line reliably; returns once the server acked it.
    pub async fn send_command(&self, line: &str) -> anyhow::Result<()> {
        self.transport.send_to(line.as_bytes(), self.server).await
    }

    /// Drains delivered messages from the server as text lines. Messages
    /// from any other source are discarded.
    pub fn take_server_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some((from, payload)) = self.transport.try_recv() {
            if from != self.server {
                continue;
            }
            lines.push(String::from_utf8_lossy(&payload).into_owned());
        }
        lines
    }

    /// Spawns the background reader: polls the transport and prints every
    /// server line until `shutdown` is called.
    pub fn spawn_reader(&self) -> JoinHandle<()> {
        let reader = self.clone();
        tokio::spawn(async move {
            while !reader.stop.load(Ordering::Relaxed) {
                if let Err(err) = reader.transport.poll(READER_POLL).await {
                    warn!(error = %err, "reader stopping on socket error");
                    break;
                }
                for line in reader.take_server_lines() {
                    println!("{line}");
                }
            }
        })
    }

    /// Asks the background reader to stop after its current poll.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
