//! Outbound half: drain the scheduler into sealed packets.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tracing::{debug, trace, warn};

use crate::core::{QlicError, WRITER_POLL_INTERVAL};
use crate::transport::varint::varint_len;
use crate::transport::{Frame, PacketWriter};

use super::engine::EngineInner;

impl EngineInner {
    /// Plaintext budget per packet: the packet size minus the length
    /// prefix and the record tag.
    fn body_limit(&self) -> usize {
        self.packet_size
            .saturating_sub(varint_len(self.packet_size as u64))
            .saturating_sub(self.security.record_overhead())
    }

    /// How long the writer may sleep before the next timer is due.
    fn writer_wait(&self) -> Duration {
        if !self.phase().is_established() {
            return WRITER_POLL_INTERVAL;
        }
        let settings = self.settings();
        let traffic = self.lock_traffic();
        let mut wait = WRITER_POLL_INTERVAL;
        if let Some(interval) = settings.keep_alive {
            wait = wait.min(traffic.keep_alive_due_in(interval));
        }
        if let Some(timeout) = settings.idle_timeout {
            wait = wait.min(traffic.receive_deadline_in(timeout));
        }
        wait
    }

    /// Write packets until flow control shuts down.
    pub(super) async fn write_loop<W>(self: Arc<Self>, mut writer: PacketWriter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let Some(ready) = self.flow.wait_for_data(self.writer_wait()).await else {
                break;
            };
            // Checked on every wake so a busy writer still sees its timers.
            self.on_timer();
            if !ready || self.is_stopped() {
                continue;
            }

            let limit = self.body_limit();
            let mut body = Vec::with_capacity(limit);
            let (written, completions) = self.flow.write_data_to_stream(&mut body, limit);
            if written == 0 {
                warn!(role = ?self.role, "drain produced no output");
                completions.fire();
                tokio::task::yield_now().await;
                continue;
            }

            match writer.write_packet(&body).await {
                Ok(wire_len) => {
                    self.lock_traffic().on_sent(wire_len);
                    completions.fire();
                    self.after_send();
                }
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }
        }
        if let Err(err) = writer.shutdown().await {
            trace!(role = ?self.role, error = %err, "socket shutdown");
        }
        debug!(role = ?self.role, "writer stopped");
    }

    /// Keep-alive and idle-timeout checks.
    fn on_timer(&self) {
        if !self.phase().is_established() {
            return;
        }
        let settings = self.settings();
        let (idle, ping) = {
            let mut traffic = self.lock_traffic();
            let idle = settings
                .idle_timeout
                .is_some_and(|timeout| traffic.receive_deadline_in(timeout).is_zero());
            let ping = settings
                .keep_alive
                .is_some_and(|interval| traffic.keep_alive_due_in(interval).is_zero());
            if ping {
                traffic.on_keep_alive();
            }
            (idle, ping)
        };
        if idle {
            self.fail(QlicError::IdleTimeout);
            return;
        }
        if ping {
            trace!(role = ?self.role, "keep-alive ping");
            self.queue_control(Frame::Ping, false);
        }
    }

    /// Low-latency bookkeeping after each packet: probe for an Ack once a
    /// packet's worth has gone out and hide low priorities while the peer
    /// is behind.
    fn after_send(&self) {
        if !self.settings().low_latency || !self.phase().is_established() {
            return;
        }
        let (throttle, ping) = {
            let mut traffic = self.lock_traffic();
            let ping = traffic.ping_required();
            if ping {
                traffic.on_ping();
            }
            (traffic.throttling_required(), ping)
        };
        if ping {
            self.queue_control(Frame::Ping, false);
        }
        if throttle {
            if self.flow.throttling_floor().is_none() {
                debug!(
                    role = ?self.role,
                    floor = %self.throttle_floor,
                    "unacknowledged backlog, throttling"
                );
            }
            self.flow.start_throttling(self.throttle_floor);
        } else {
            self.flow.stop_throttling();
        }
    }
}
