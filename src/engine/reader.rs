//! Inbound half: packets to frames to handlers.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tracing::{debug, info, trace};

use crate::core::QlicError;
use crate::transport::{Frame, FrameHandler, PacketReader};

use super::engine::EngineInner;

impl EngineInner {
    /// Read packets until the peer closes the socket, an error occurs or
    /// the connection stops.
    pub(super) async fn read_loop<R>(self: Arc<Self>, mut reader: PacketReader<R>)
    where
        R: AsyncRead + Unpin,
    {
        let mut stop = self.stop_signal();
        loop {
            let packet = tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                packet = reader.read_packet() => packet,
            };
            match packet {
                Ok(Some(packet)) => {
                    self.lock_traffic().on_received(packet.wire_len);
                    if let Err(err) = self.handle_packet(packet.body) {
                        self.fail(err);
                        break;
                    }
                }
                Ok(None) => {
                    debug!(role = ?self.role, "peer closed the socket");
                    self.shutdown();
                    break;
                }
                Err(err) => {
                    self.fail(err);
                    break;
                }
            }
        }
        debug!(role = ?self.role, "reader stopped");
    }

    /// Decode every frame of a packet and hand it to the active handler:
    /// the handshake until its input is finished, the stream manager after.
    fn handle_packet(&self, mut body: Bytes) -> Result<(), QlicError> {
        while let Some(frame) = Frame::decode(&mut body)? {
            if self.is_stopped() {
                break;
            }
            trace!(role = ?self.role, frame_type = ?frame.frame_type(), "frame received");
            let handler: &dyn FrameHandler = match &self.handshake {
                Some(handshake) if !handshake.is_input_finished() => &**handshake,
                _ => &*self.streams,
            };
            if let Some(frame) = handler.handle_frame(frame)? {
                self.handle_connection_frame(frame)?;
            }
        }
        Ok(())
    }

    /// Frames no handler claimed.
    fn handle_connection_frame(&self, frame: Frame) -> Result<(), QlicError> {
        match frame {
            Frame::Padding => {}
            Frame::Ping => {
                let bytes_since_last_ack = self.lock_traffic().take_unacknowledged_received();
                self.queue_control(
                    Frame::Ack {
                        bytes_since_last_ack,
                    },
                    true,
                );
            }
            Frame::Ack {
                bytes_since_last_ack,
            } => {
                let throttle = {
                    let mut traffic = self.lock_traffic();
                    traffic.on_acknowledged(bytes_since_last_ack);
                    traffic.throttling_required()
                };
                if !throttle && self.flow.throttling_floor().is_some() {
                    trace!(role = ?self.role, "backlog acknowledged, throttling lifted");
                    self.flow.stop_throttling();
                }
            }
            Frame::ConnectionCloseApplication { error_code, reason } => {
                info!(role = ?self.role, error_code, %reason, "peer closed the connection");
                self.shutdown();
            }
            Frame::ConnectionCloseProtocol {
                error_code, reason, ..
            } => return Err(QlicError::PeerClosed { error_code, reason }),
            other => {
                debug!(
                    role = ?self.role,
                    frame_type = ?other.frame_type(),
                    "unclaimed frame dropped"
                );
            }
        }
        Ok(())
    }
}
