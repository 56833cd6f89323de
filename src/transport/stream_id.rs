//! Stream identifiers.
//!
//! On the wire a stream id is one varint packing:
//!
//! ```text
//! bits 5..  stream number
//! bits 2..4 urgency (0-7)
//! bit 1     unidirectional
//! bit 0     client-initiated
//! ```
//!
//! Urgency and direction travel with every frame but are not part of the
//! stream's identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::core::Role;
use crate::flow::Priority;

use super::varint::VARINT_MAX;

const CLIENT_INITIATED_BIT: u64 = 0x01;
const UNIDIRECTIONAL_BIT: u64 = 0x02;
const URGENCY_SHIFT: u32 = 2;
const NUMBER_SHIFT: u32 = 5;

/// Largest stream number that still fits in a varint.
pub const MAX_STREAM_NUMBER: u64 = VARINT_MAX >> NUMBER_SHIFT;

/// A stream identifier plus per-frame urgency and direction metadata.
#[derive(Debug, Clone, Copy)]
pub struct StreamId {
    number: u64,
    client_initiated: bool,
    unidirectional: bool,
    urgency: Priority,
}

impl StreamId {
    /// Create a stream id.
    pub fn new(number: u64, initiator: Role, unidirectional: bool, urgency: Priority) -> Self {
        Self {
            number: number.min(MAX_STREAM_NUMBER),
            client_initiated: initiator.is_client(),
            unidirectional,
            urgency,
        }
    }

    /// Unpack a wire value.
    pub fn from_raw(raw: u64) -> Self {
        Self {
            number: raw >> NUMBER_SHIFT,
            client_initiated: raw & CLIENT_INITIATED_BIT != 0,
            unidirectional: raw & UNIDIRECTIONAL_BIT != 0,
            urgency: Priority::from_bits((raw >> URGENCY_SHIFT) as u8),
        }
    }

    /// Pack into a wire value.
    pub fn to_raw(self) -> u64 {
        let mut raw = self.number << NUMBER_SHIFT;
        raw |= u64::from(self.urgency.level()) << URGENCY_SHIFT;
        if self.unidirectional {
            raw |= UNIDIRECTIONAL_BIT;
        }
        if self.client_initiated {
            raw |= CLIENT_INITIATED_BIT;
        }
        raw
    }

    /// Stream number.
    pub fn number(self) -> u64 {
        self.number
    }

    /// Whether the client opened this stream.
    pub fn is_client_initiated(self) -> bool {
        self.client_initiated
    }

    /// The role that opened this stream.
    pub fn initiator(self) -> Role {
        if self.client_initiated {
            Role::Client
        } else {
            Role::Server
        }
    }

    /// Whether the stream carries data in one direction only.
    pub fn is_unidirectional(self) -> bool {
        self.unidirectional
    }

    /// Urgency of the frame carrying this id.
    pub fn urgency(self) -> Priority {
        self.urgency
    }

    /// Same stream, different urgency.
    pub fn with_urgency(self, urgency: Priority) -> Self {
        Self { urgency, ..self }
    }
}

impl PartialEq for StreamId {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number && self.client_initiated == other.client_initiated
    }
}

impl Eq for StreamId {}

impl Hash for StreamId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state);
        self.client_initiated.hash(state);
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.client_initiated { 'c' } else { 's' };
        write!(f, "{}{}", side, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stream_id_packing() {
        let id = StreamId::new(9, Role::Client, true, Priority::MAX);
        let raw = id.to_raw();
        assert_eq!(raw, (9 << 5) | (7 << 2) | 0b11);

        let decoded = StreamId::from_raw(raw);
        assert_eq!(decoded.number(), 9);
        assert!(decoded.is_client_initiated());
        assert!(decoded.is_unidirectional());
        assert_eq!(decoded.urgency(), Priority::MAX);
    }

    #[test]
    fn test_identity_ignores_urgency_and_direction() {
        let a = StreamId::new(4, Role::Server, false, Priority::MIN);
        let b = StreamId::new(4, Role::Server, true, Priority::MAX);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_identity_of_stream_257() {
        let a = StreamId::new(257, Role::Server, true, Priority::new(5).unwrap());
        let b = StreamId::new(257, Role::Server, false, Priority::new(7).unwrap());
        let c = StreamId::new(257, Role::Client, true, Priority::new(5).unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(StreamId::from_raw(a.to_raw()), b);
    }

    #[test]
    fn test_identity_respects_initiator() {
        let a = StreamId::new(4, Role::Server, false, Priority::DEFAULT);
        let b = StreamId::new(4, Role::Client, false, Priority::DEFAULT);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "s4");
        assert_eq!(b.to_string(), "c4");
    }
}
