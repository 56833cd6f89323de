//! Server side of the handshake.

use bytes::Bytes;
use tracing::debug;

use crate::core::{CLIENT_VERIFY_CONTEXT, QlicError, SERVER_VERIFY_CONTEXT};
use crate::crypto::auth::{select_algorithm, verify_message};
use crate::crypto::{EphemeralKeyExchange, Phase, PhaseKeys, hello_nonce};

use super::{Handshake, HandshakeMessage, HandshakeState, MessageType, Negotiated, Offer};

impl Handshake {
    pub(super) fn server_handle(
        &self,
        state: &mut HandshakeState,
        message: HandshakeMessage,
        raw: &[u8],
    ) -> Result<(), QlicError> {
        match message {
            HandshakeMessage::ClientHello {
                share,
                supported_local,
                accepted_remote,
                ..
            } => {
                self.record(raw);
                state.offer = Offer {
                    supported_local,
                    accepted_remote,
                };

                let exchange = EphemeralKeyExchange::generate();
                let hello = HandshakeMessage::ServerHello {
                    nonce: hello_nonce(),
                    share: Bytes::copy_from_slice(&exchange.public_bytes()),
                };
                let encoded = self.record_outbound(&hello);
                let shared = exchange.complete(&share)?;
                self.security.complete_key_exchange(shared.as_slice())?;
                let keys = self.security.derive_keys(Phase::Handshake)?;

                state.expected = Some(MessageType::AuthShare);
                let on_sent = self.on_sent(move |handshake| handshake.server_hello_sent(&keys));
                self.enqueue(encoded, Some(on_sent))
            }
            HandshakeMessage::AuthShare { share } => {
                let negotiated = state
                    .negotiated
                    .as_ref()
                    .ok_or_else(|| QlicError::InternalState("authentication not negotiated".into()))?;
                let binding = self.security.transcript_hash();
                let peer = negotiated.validator.validate(&share, &binding)?;
                self.record(raw);
                state.peer = Some(peer);
                state.expected = Some(MessageType::AuthVerify);
                Ok(())
            }
            HandshakeMessage::AuthVerify { signature } => {
                let peer = state
                    .peer
                    .as_ref()
                    .ok_or_else(|| QlicError::InternalState("peer not validated".into()))?;
                let signed = verify_message(CLIENT_VERIFY_CONTEXT, &self.security.transcript_hash());
                peer.verify(&signed, &signature)?;
                self.record(raw);

                let keys = self.security.derive_keys(Phase::Session)?;
                self.security.install_keys(&keys)?;
                state.expected = None;
                state.input_finished = true;
                self.complete();
                Ok(())
            }
            HandshakeMessage::ServerHello { .. } | HandshakeMessage::AuthRequest { .. } => Ok(()),
        }
    }

    /// Runs once the ServerHello is on the wire: switch to handshake keys,
    /// choose algorithms and authenticate.
    fn server_hello_sent(&self, keys: &PhaseKeys) -> Result<(), QlicError> {
        self.security.install_keys(keys)?;

        let mut state = self.lock();
        if state.closed {
            return Ok(());
        }
        let client_index = select_algorithm(&state.offer.supported_local, &self.auth.accepted_remote());
        let server_index = select_algorithm(&state.offer.accepted_remote, &self.auth.supported_local());
        let request = HandshakeMessage::AuthRequest {
            client_algorithm: client_index,
            server_algorithm: server_index,
        };

        let negotiated = (client_index != 0 && server_index != 0)
            .then(|| {
                let client = state.offer.supported_local[client_index as usize - 1];
                let server = state.offer.accepted_remote[server_index as usize - 1];
                debug!(client = %client, server = %server, "authentication algorithms chosen");
                Some(Negotiated {
                    authenticator: self.auth.authenticator(server)?,
                    validator: self.auth.validator(client)?,
                })
            })
            .flatten();

        let Some(negotiated) = negotiated else {
            let on_sent = self.on_sent(|_| {
                Err(QlicError::Authorization(
                    "no mutually acceptable authentication algorithm".into(),
                ))
            });
            return self.send(request, Some(on_sent));
        };
        self.send(request, None)?;

        let authenticator = negotiated.authenticator.clone();
        state.negotiated = Some(negotiated);

        let share = authenticator.create_share(&self.security.transcript_hash())?;
        self.send(
            HandshakeMessage::AuthShare {
                share: Bytes::from(share),
            },
            None,
        )?;
        let signed = verify_message(SERVER_VERIFY_CONTEXT, &self.security.transcript_hash());
        self.send(
            HandshakeMessage::AuthVerify {
                signature: Bytes::from(authenticator.sign(&signed)?),
            },
            None,
        )
    }
}
