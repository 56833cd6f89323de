//! Byte accounting for acknowledgments, throttling and liveness.
//!
//! The receiver acknowledges the wire bytes it has read since its previous
//! Ack. The sender compares its own wire byte count with the acknowledged
//! total to decide when to throttle and when to probe with a Ping.

use std::time::Duration;

use tokio::time::Instant;

use crate::core::{THROTTLE_PACKETS_DEN, THROTTLE_PACKETS_NUM};

/// Cumulative traffic counters for one connection.
#[derive(Debug, Clone)]
pub struct TrafficManager {
    packet_size: u64,
    sent: u64,
    received: u64,
    acknowledged: u64,
    ack_baseline: u64,
    ping_baseline: u64,
    last_send: Instant,
    last_receive: Instant,
    last_keep_alive: Instant,
}

impl TrafficManager {
    /// Counters for a connection using `packet_size`-byte packets.
    pub fn new(packet_size: usize) -> Self {
        let now = Instant::now();
        Self {
            packet_size: packet_size as u64,
            sent: 0,
            received: 0,
            acknowledged: 0,
            ack_baseline: 0,
            ping_baseline: 0,
            last_send: now,
            last_receive: now,
            last_keep_alive: now,
        }
    }

    /// Record a packet written to the socket.
    pub fn on_sent(&mut self, bytes: usize) {
        self.sent += bytes as u64;
        self.last_send = Instant::now();
    }

    /// Record a packet read from the socket.
    pub fn on_received(&mut self, bytes: usize) {
        self.received += bytes as u64;
        self.last_receive = Instant::now();
    }

    /// Record a peer Ack. Acknowledgments beyond what was sent are clamped.
    pub fn on_acknowledged(&mut self, bytes: u64) {
        self.acknowledged = self.acknowledged.saturating_add(bytes).min(self.sent);
    }

    /// Received bytes not yet acknowledged, resetting the baseline.
    pub fn take_unacknowledged_received(&mut self) -> u64 {
        let pending = self.received - self.ack_baseline;
        self.ack_baseline = self.received;
        pending
    }

    /// Sent bytes the peer has not acknowledged.
    pub fn unacknowledged_sent(&self) -> u64 {
        self.sent - self.acknowledged
    }

    /// Whether the unacknowledged backlog is at least 2.5 packets.
    pub fn throttling_required(&self) -> bool {
        self.unacknowledged_sent() * THROTTLE_PACKETS_DEN as u64
            >= self.packet_size * THROTTLE_PACKETS_NUM as u64
    }

    /// Whether a full packet has been sent since the last Ping.
    pub fn ping_required(&self) -> bool {
        self.sent - self.ping_baseline >= self.packet_size
    }

    /// Record that a Ping was queued.
    pub fn on_ping(&mut self) {
        self.ping_baseline = self.sent;
    }

    /// Record a keep-alive Ping. Restarts the keep-alive clock before the
    /// Ping reaches the socket.
    pub fn on_keep_alive(&mut self) {
        self.on_ping();
        self.last_keep_alive = Instant::now();
    }

    /// Time left until a keep-alive Ping is due under `interval`.
    pub fn keep_alive_due_in(&self, interval: Duration) -> Duration {
        let quiet = self.last_send.max(self.last_keep_alive).elapsed();
        interval.saturating_sub(quiet)
    }

    /// Time left until `timeout` without receiving expires.
    pub fn receive_deadline_in(&self, timeout: Duration) -> Duration {
        timeout.saturating_sub(self.receive_idle_duration())
    }

    /// Time since anything was sent.
    pub fn idle_duration(&self) -> Duration {
        self.last_send.elapsed()
    }

    /// Time since anything was received.
    pub fn receive_idle_duration(&self) -> Duration {
        self.last_receive.elapsed()
    }

    /// Total wire bytes sent.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Total wire bytes received.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Total bytes acknowledged by the peer.
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }
}
