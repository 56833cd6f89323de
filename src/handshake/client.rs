//! Client side of the handshake.

use bytes::Bytes;
use tracing::debug;

use crate::core::{CLIENT_VERIFY_CONTEXT, DecodeError, QlicError, SERVER_VERIFY_CONTEXT};
use crate::crypto::auth::verify_message;
use crate::crypto::{AuthAlgorithm, EphemeralKeyExchange, Phase, hello_nonce};

use super::{Handshake, HandshakeMessage, HandshakeState, MessageType, Negotiated, Offer};

impl Handshake {
    pub(super) fn send_client_hello(&self, state: &mut HandshakeState) -> Result<(), QlicError> {
        let exchange = EphemeralKeyExchange::generate();
        state.offer = Offer {
            supported_local: self.auth.supported_local(),
            accepted_remote: self.auth.accepted_remote(),
        };
        let hello = HandshakeMessage::ClientHello {
            nonce: hello_nonce(),
            share: Bytes::copy_from_slice(&exchange.public_bytes()),
            supported_local: state.offer.supported_local.clone(),
            accepted_remote: state.offer.accepted_remote.clone(),
        };
        state.exchange = Some(exchange);
        state.expected = Some(MessageType::ServerHello);
        self.send(hello, None)
    }

    pub(super) fn client_handle(
        &self,
        state: &mut HandshakeState,
        message: HandshakeMessage,
        raw: &[u8],
    ) -> Result<(), QlicError> {
        match message {
            HandshakeMessage::ServerHello { share, .. } => {
                self.record(raw);
                let exchange = state
                    .exchange
                    .take()
                    .ok_or_else(|| QlicError::InternalState("key exchange already used".into()))?;
                let shared = exchange.complete(&share)?;
                self.security.complete_key_exchange(shared.as_slice())?;
                let keys = self.security.derive_keys(Phase::Handshake)?;
                self.security.install_keys(&keys)?;
                state.expected = Some(MessageType::AuthRequest);
                Ok(())
            }
            HandshakeMessage::AuthRequest {
                client_algorithm,
                server_algorithm,
            } => {
                self.record(raw);
                if client_algorithm == 0 || server_algorithm == 0 {
                    return Err(QlicError::Authorization(
                        "server found no acceptable authentication algorithm".into(),
                    ));
                }
                let local = pick(&state.offer.supported_local, client_algorithm)?;
                let remote = pick(&state.offer.accepted_remote, server_algorithm)?;
                let authenticator = self.auth.authenticator(local).ok_or_else(|| {
                    QlicError::InternalState(format!("no authenticator for {local}"))
                })?;
                let validator = self.auth.validator(remote).ok_or_else(|| {
                    QlicError::InternalState(format!("no validator for {remote}"))
                })?;
                debug!(%local, %remote, "authentication algorithms chosen");
                state.negotiated = Some(Negotiated {
                    authenticator,
                    validator,
                });
                state.expected = Some(MessageType::AuthShare);
                Ok(())
            }
            HandshakeMessage::AuthShare { share } => {
                let negotiated = negotiated(state)?;
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
                let signed = verify_message(SERVER_VERIFY_CONTEXT, &self.security.transcript_hash());
                peer.verify(&signed, &signature)?;
                self.record(raw);
                state.expected = None;
                self.send_client_auth(state)
            }
            HandshakeMessage::ClientHello { .. } => Ok(()),
        }
    }

    /// Send our AuthShare and AuthVerify, then switch keys: decryption now,
    /// encryption once the AuthVerify is on the wire.
    fn send_client_auth(&self, state: &mut HandshakeState) -> Result<(), QlicError> {
        let authenticator = negotiated(state)?.authenticator.clone();

        let share = authenticator.create_share(&self.security.transcript_hash())?;
        self.send(
            HandshakeMessage::AuthShare {
                share: Bytes::from(share),
            },
            None,
        )?;

        let signed = verify_message(CLIENT_VERIFY_CONTEXT, &self.security.transcript_hash());
        let verify = HandshakeMessage::AuthVerify {
            signature: Bytes::from(authenticator.sign(&signed)?),
        };
        let encoded = self.record_outbound(&verify);

        let keys = self.security.derive_keys(Phase::Session)?;
        self.security.install_decryption(keys.decrypt_keys(self.role))?;
        state.input_finished = true;

        let encrypt = keys.encrypt_keys(self.role).clone();
        let on_sent = self.on_sent(move |handshake| {
            handshake.security.install_encryption(&encrypt)?;
            handshake.complete();
            Ok(())
        });
        self.enqueue(encoded, Some(on_sent))
    }
}

fn negotiated(state: &HandshakeState) -> Result<&Negotiated, QlicError> {
    state
        .negotiated
        .as_ref()
        .ok_or_else(|| QlicError::InternalState("authentication not negotiated".into()))
}

/// Resolve a 1-based index from AuthRequest.
fn pick(offered: &[AuthAlgorithm], index: u64) -> Result<AuthAlgorithm, QlicError> {
    usize::try_from(index - 1)
        .ok()
        .and_then(|i| offered.get(i).copied())
        .ok_or_else(|| {
            DecodeError::InvalidEncoding(format!("algorithm index {index} out of range")).into()
        })
}
