//! Reliable stop-and-wait message transport over UDP.
//!
//! One endpoint serves any number of peers over a single datagram socket.
//! Per peer, one sequence bit is kept per direction: `send_next` stamps the
//! next outbound message, `expect_next` gates inbound acceptance. A send
//! blocks until the matching ack arrives, retransmitting on a fixed
//! per-attempt timeout, while still accepting and acking inbound traffic
//! from every peer. There is no give-up signal: under total loss a send
//! never returns.
//!
//! The transport adds no integrity check (the datagram service already
//! carries one) and makes no ordering promise across distinct peers.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::codec::{self, Packet, SeqBit};
use crate::loss::LossInjector;

/// Largest datagram read or written.
pub const MAX_PACKET: usize = 1024;
/// Bytes reserved for the textual header when sizing payloads.
pub const HEADER_RESERVE: usize = 16;
/// Default per-attempt retransmission timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(300);

/// The only structured error a send surfaces: the payload cannot fit in a
/// single datagram. Everything transient is absorbed by retransmission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload too large ({len} bytes, max {max})")]
pub struct PayloadTooLarge {
    pub len: usize,
    pub max: usize,
}

/// Endpoint tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-attempt ack timeout; no backoff between attempts.
    pub timeout: Duration,
    /// Maximum wire datagram size.
    pub max_packet: usize,
    /// Simulated egress loss probability.
    pub loss_prob: f64,
    /// Fixed loss seed for reproducible runs.
    pub loss_seed: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_packet: MAX_PACKET,
            loss_prob: 0.0,
            loss_seed: None,
        }
    }
}

impl TransportConfig {
    /// Config with a given loss probability and defaults elsewhere.
    pub fn with_loss(loss_prob: f64) -> Self {
        Self {
            loss_prob,
            ..Self::default()
        }
    }
}

/// Per-peer protocol state, created lazily on first contact and kept for
/// the endpoint lifetime.
#[derive(Debug, Default)]
struct PeerState {
    /// Bit stamped on the next outbound message to this peer.
    send_next: SeqBit,
    /// Bit required on the next inbound data packet; the other bit is a
    /// duplicate.
    expect_next: SeqBit,
    /// Acks observed since the last send consumed them, one slot per bit.
    acked: [bool; 2],
}

#[derive(Debug, Default)]
struct EndpointState {
    peers: HashMap<SocketAddr, PeerState>,
    delivered: VecDeque<(SocketAddr, Bytes)>,
}

/// A reliable message endpoint bound to one UDP socket.
///
/// Fully symmetric: there is no client/server role at this layer. All
/// mutable state sits behind one mutex that is never held across an await,
/// so a background task may `poll` while another task is mid-send.
pub struct ReliableEndpoint {
    socket: UdpSocket,
    loss: LossInjector,
    timeout: Duration,
    max_packet: usize,
    state: Mutex<EndpointState>,
}

impl ReliableEndpoint {
    /// Binds a local UDP socket.
    pub async fn bind(addr: SocketAddr, cfg: TransportConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        let loss = match cfg.loss_seed {
            Some(seed) => LossInjector::seeded(cfg.loss_prob, seed),
            None => LossInjector::new(cfg.loss_prob),
        };
        Ok(Self {
            socket,
            loss,
            timeout: cfg.timeout,
            max_packet: cfg.max_packet,
            state: Mutex::new(EndpointState::default()),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Largest payload `send_to` accepts.
    pub fn max_payload(&self) -> usize {
        self.max_packet - HEADER_RESERVE
    }

    /// Reliable send: returns once the matching ack has been observed,
    /// retransmitting indefinitely on timeout. While waiting, inbound
    /// traffic from any peer keeps being processed, so a send to one peer
    /// never starves deliveries from another.
    pub async fn send_to(&self, payload: &[u8], peer: SocketAddr) -> anyhow::Result<()> {
        if payload.len() > self.max_payload() {
            return Err(PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload(),
            }
            .into());
        }

        let seq = {
            let mut state = self.lock_state();
            state.peers.entry(peer).or_default().send_next
        };
        let wire = codec::encode_data(seq, payload);

        let mut attempt = 0u64;
        loop {
            attempt += 1;
            if attempt > 1 {
                debug!(%peer, %seq, attempt, "retransmitting after ack timeout");
            }
            self.transmit(&wire, peer).await?;

            let deadline = Instant::now() + self.timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.poll(remaining).await?;
                if self.consume_ack(peer, seq) {
                    return Ok(());
                }
            }
        }
    }

    /// Receives and processes at most one datagram, waiting up to
    /// `timeout`. Acks are recorded, fresh data is enqueued for `try_recv`,
    /// duplicates are re-acked and dropped, malformed packets are
    /// discarded. A read timeout is not an error.
    pub async fn poll(&self, timeout: Duration) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.max_packet];
        let (n, from) = match time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok(got)) => got,
            Ok(Err(e)) => return Err(e).context("udp recv"),
            Err(_) => return Ok(()),
        };

        match codec::decode(&buf[..n]) {
            Some(Packet::Ack { seq }) => {
                trace!(peer = %from, %seq, "ack observed");
                let mut state = self.lock_state();
                state.peers.entry(from).or_default().acked[seq.index()] = true;
            }
            Some(Packet::Data { seq, payload }) => {
                // Accept-or-drop is decided before the ack leaves, so a
                // concurrent poller can never see the ack'd bit with stale
                // peer state.
                let fresh = {
                    let mut state = self.lock_state();
                    let entry = state.peers.entry(from).or_default();
                    let fresh = seq == entry.expect_next;
                    if fresh {
                        entry.expect_next = seq.flip();
                    }
                    if fresh {
                        state
                            .delivered
                            .push_back((from, Bytes::copy_from_slice(payload)));
                    }
                    fresh
                };
                if !fresh {
                    trace!(peer = %from, %seq, "duplicate data dropped");
                }
                // Ack every data packet, duplicate or not: the sender
                // cannot tell a lost ack from a lost data packet.
                self.transmit(&codec::encode_ack(seq), from).await?;
            }
            None => {
                trace!(peer = %from, len = n, "undecodable datagram discarded");
            }
        }
        Ok(())
    }

    /// Non-blocking pop of the oldest delivered message.
    pub fn try_recv(&self) -> Option<(SocketAddr, Bytes)> {
        self.lock_state().delivered.pop_front()
    }

    /// Writes one datagram, unless the loss injector eats it.
    async fn transmit(&self, wire: &[u8], peer: SocketAddr) -> anyhow::Result<()> {
        if self.loss.should_drop() {
            trace!(%peer, len = wire.len(), "simulated loss on egress");
            return Ok(());
        }
        self.socket.send_to(wire, peer).await.context("udp send")?;
        Ok(())
    }

    /// Consumes a recorded ack for (peer, seq). On success the peer's send
    /// bit flips, committing the message as delivered.
    fn consume_ack(&self, peer: SocketAddr, seq: SeqBit) -> bool {
        let mut state = self.lock_state();
        let entry = state.peers.entry(peer).or_default();
        if entry.acked[seq.index()] {
            entry.acked[seq.index()] = false;
            entry.send_next = seq.flip();
            true
        } else {
            false
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EndpointState> {
        self.state.lock().expect("endpoint state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_pair(cfg: TransportConfig) -> (ReliableEndpoint, ReliableEndpoint) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = ReliableEndpoint::bind(addr, cfg.clone()).await.unwrap();
        let b = ReliableEndpoint::bind(addr, cfg).await.unwrap();
        (a, b)
    }

    /// Polls `ep` until one message pops out of its delivered queue.
    async fn pump_one(ep: &ReliableEndpoint) -> (SocketAddr, Bytes) {
        loop {
            ep.poll(Duration::from_millis(20)).await.unwrap();
            if let Some(item) = ep.try_recv() {
                return item;
            }
        }
    }

    #[tokio::test]
    async fn lossless_send_delivers_in_order() {
        let (a, b) = bind_pair(TransportConfig::default()).await;
        let b_addr = b.local_addr().unwrap();

        for expected in [&b"first"[..], b"second", b"third"] {
            let (sent, (from, payload)) =
                tokio::join!(a.send_to(expected, b_addr), pump_one(&b));
            sent.unwrap();
            assert_eq!(from, a.local_addr().unwrap());
            assert_eq!(&payload[..], expected);
        }
    }

    #[tokio::test]
    async fn empty_payload_is_delivered() {
        let (a, b) = bind_pair(TransportConfig::default()).await;
        let b_addr = b.local_addr().unwrap();

        let (sent, (_, payload)) = tokio::join!(a.send_to(b"", b_addr), pump_one(&b));
        sent.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn payload_size_boundary() {
        let (a, b) = bind_pair(TransportConfig::default()).await;
        let b_addr = b.local_addr().unwrap();

        // One byte over the cap is the caller's bug.
        let oversize = vec![b'x'; a.max_payload() + 1];
        let err = a.send_to(&oversize, b_addr).await.unwrap_err();
        let too_large = err
            .downcast_ref::<PayloadTooLarge>()
            .expect("expected PayloadTooLarge");
        assert_eq!(too_large.len, a.max_payload() + 1);

        // Exactly at the cap goes through.
        let max = vec![b'y'; a.max_payload()];
        let (sent, (_, payload)) = tokio::join!(a.send_to(&max, b_addr), pump_one(&b));
        sent.unwrap();
        assert_eq!(payload.len(), a.max_payload());
    }

    #[tokio::test]
    async fn wire_bits_alternate_and_get_acked() {
        let ep = ReliableEndpoint::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_addr = raw.local_addr().unwrap();

        let mut buf = [0u8; MAX_PACKET];
        for (msg, frame) in [(&b"a"[..], &b"SEQ:0|a"[..]), (b"b", b"SEQ:1|b")] {
            let echo = async {
                let (n, from) = raw.recv_from(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], frame);
                let seq = match codec::decode(&buf[..n]) {
                    Some(Packet::Data { seq, .. }) => seq,
                    other => panic!("expected data frame, got {other:?}"),
                };
                raw.send_to(&codec::encode_ack(seq), from).await.unwrap();
            };
            let (sent, ()) = tokio::join!(ep.send_to(msg, raw_addr), echo);
            sent.unwrap();
        }
    }

    #[tokio::test]
    async fn unacked_data_is_retransmitted() {
        let cfg = TransportConfig {
            timeout: Duration::from_millis(20),
            ..TransportConfig::default()
        };
        let ep = ReliableEndpoint::bind("127.0.0.1:0".parse().unwrap(), cfg)
            .await
            .unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_addr = raw.local_addr().unwrap();

        let mut buf = [0u8; MAX_PACKET];
        let silent_then_ack = async {
            // Swallow the first attempt; the sender must try again.
            let (n1, _) = raw.recv_from(&mut buf).await.unwrap();
            let first = buf[..n1].to_vec();
            let (n2, from) = raw.recv_from(&mut buf).await.unwrap();
            assert_eq!(first, &buf[..n2], "retransmission must be identical");
            raw.send_to(&codec::encode_ack(SeqBit::ZERO), from)
                .await
                .unwrap();
        };
        let (sent, ()) = tokio::join!(ep.send_to(b"stubborn", raw_addr), silent_then_ack);
        sent.unwrap();
    }

    #[tokio::test]
    async fn duplicate_data_is_acked_but_delivered_once() {
        let ep = ReliableEndpoint::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let ep_addr = ep.local_addr().unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let frame = codec::encode_data(SeqBit::ZERO, b"hello");
        let mut buf = [0u8; MAX_PACKET];
        for _ in 0..2 {
            raw.send_to(&frame, ep_addr).await.unwrap();
            ep.poll(Duration::from_millis(100)).await.unwrap();
            // Every copy, fresh or duplicate, earns an ack.
            let (n, _) = raw.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ACK:0");
        }

        assert_eq!(ep.try_recv().map(|(_, p)| p), Some(Bytes::from_static(b"hello")));
        assert!(ep.try_recv().is_none(), "duplicate must not be delivered");
    }

    #[tokio::test]
    async fn undecodable_datagrams_are_ignored() {
        let ep = ReliableEndpoint::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let ep_addr = ep.local_addr().unwrap();
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        raw.send_to(b"garbage", ep_addr).await.unwrap();
        raw.send_to(&codec::encode_data(SeqBit::ZERO, b"real"), ep_addr)
            .await
            .unwrap();
        ep.poll(Duration::from_millis(100)).await.unwrap();
        ep.poll(Duration::from_millis(100)).await.unwrap();

        let (_, payload) = ep.try_recv().expect("valid frame should survive");
        assert_eq!(&payload[..], b"real");
        assert!(ep.try_recv().is_none());
    }

    #[tokio::test]
    async fn poll_timeout_is_not_an_error() {
        let ep = ReliableEndpoint::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        ep.poll(Duration::from_millis(10)).await.unwrap();
        assert!(ep.try_recv().is_none());
    }

    #[tokio::test]
    async fn lossy_channel_still_delivers_exactly_once_in_order() {
        let cfg = TransportConfig {
            timeout: Duration::from_millis(20),
            loss_prob: 0.5,
            loss_seed: Some(7),
            ..TransportConfig::default()
        };
        let (a, b) = bind_pair(cfg).await;
        let b_addr = b.local_addr().unwrap();

        let messages: Vec<String> = (0..5).map(|i| format!("msg-{i}")).collect();
        let send_all = async {
            for m in &messages {
                a.send_to(m.as_bytes(), b_addr).await.unwrap();
            }
        };
        let recv_all = async {
            let mut got = Vec::new();
            while got.len() < messages.len() {
                let (_, payload) = pump_one(&b).await;
                got.push(String::from_utf8(payload.to_vec()).unwrap());
            }
            got
        };

        let got = time::timeout(Duration::from_secs(30), async {
            let ((), got) = tokio::join!(send_all, recv_all);
            got
        })
        .await
        .expect("lossy exchange should converge");

        assert_eq!(got, messages, "in order, no duplicates, no gaps");
        // Nothing extra shows up afterwards.
        b.poll(Duration::from_millis(50)).await.unwrap();
        assert!(b.try_recv().is_none());
    }
}
