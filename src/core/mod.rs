//! QLIC Protocol - Core types and constants.
//!
//! This module has no dependencies on the other layers.

mod constants;
mod error;

pub use constants::*;
pub use error::*;

/// Which end of the connection this peer is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The client, which sends the first handshake message.
    Client,
    /// The server.
    Server,
}

impl Role {
    /// The opposite role.
    pub fn peer(self) -> Self {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }

    /// Whether this is the client.
    pub fn is_client(self) -> bool {
        self == Role::Client
    }
}
