//! Server loop: wires the game rules to the reliable transport.
//!
//! Single-threaded by construction; the game state is owned by the loop
//! and the transport never touches it. Replies and broadcast fan-out go
//! through the reliable send, so each message is acknowledged before the
//! next one leaves.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Context;
use hunt_shared::config::ServerConfig;
use hunt_shared::transport::{ReliableEndpoint, TransportConfig};
use tracing::{debug, info};

use crate::game::{GameState, Outbound};

/// How long one tick waits on the socket before checking the round timer.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The game server: one reliable endpoint plus the rules.
pub struct HuntServer {
    transport: ReliableEndpoint,
    game: GameState,
}

impl HuntServer {
    /// Binds on all interfaces at the configured port.
    pub async fn bind(cfg: &ServerConfig) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), cfg.port);
        let server = Self::bind_at(
            addr,
            Duration::from_secs(cfg.round_secs),
            TransportConfig::with_loss(cfg.loss_prob),
        )
        .await?;
        info!(
            port = cfg.port,
            round_secs = cfg.round_secs,
            loss = cfg.loss_prob,
            "server listening"
        );
        Ok(server)
    }

    /// Binds at an explicit address with full transport control.
    pub async fn bind_at(
        addr: SocketAddr,
        round_len: Duration,
        transport: TransportConfig,
    ) -> anyhow::Result<Self> {
        let transport = ReliableEndpoint::bind(addr, transport)
            .await
            .context("bind server endpoint")?;
        Ok(Self {
            transport,
            game: GameState::new(round_len),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Direct access to the rules, for tests and tooling.
    pub fn game_mut(&mut self) -> &mut GameState {
        &mut self.game
    }

    /// Runs ticks until the process dies.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            self.step().await?;
        }
    }

    /// One tick: maybe open a round, take in one datagram, handle every
    /// delivered command, maybe close the round.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        let opened = self.game.maybe_start_round(Instant::now());
        self.dispatch(opened).await?;

        self.transport.poll(POLL_INTERVAL).await?;
        while let Some((from, payload)) = self.transport.try_recv() {
            let text = String::from_utf8_lossy(&payload).into_owned();
            debug!(peer = %from, command = %text.trim(), "command");
            let replies = self.game.handle_command(from, &text);
            self.dispatch(replies).await?;
        }

        let closed = self.game.maybe_end_round(Instant::now());
        self.dispatch(closed).await?;
        Ok(())
    }

    /// Sends each message reliably, in order. A broadcast is a run of
    /// unicasts; the next one starts only after the previous ack.
    async fn dispatch(&self, messages: Vec<Outbound>) -> anyhow::Result<()> {
        for msg in messages {
            self.transport.send_to(msg.text.as_bytes(), msg.to).await?;
        }
        Ok(())
    }
}

/// Helper for tests: bind on an ephemeral loopback port.
pub async fn bind_ephemeral(
    round_len: Duration,
    transport: TransportConfig,
) -> anyhow::Result<HuntServer> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    HuntServer::bind_at(addr, round_len, transport).await
}
