//! Engine configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_PACKET_SIZE, HANDSHAKE_TIMEOUT, KEEPALIVE_INTERVAL, MAX_PACKET_BODY, MIN_PACKET_SIZE,
    QlicError, Role,
};
use crate::crypto::AuthConfig;
use crate::flow::Priority;

/// Default throttling floor in low-latency mode.
pub const DEFAULT_THROTTLE_FLOOR: u8 = 4;

/// How session keys are established.
#[derive(Debug, Clone)]
pub enum HandshakeMode {
    /// Run the handshake with these authentication capabilities.
    Authenticated(AuthConfig),
    /// Skip the handshake; both peers derive session keys from a shared
    /// secret.
    PreSharedSecret(Vec<u8>),
}

/// Protocol engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which end of the connection this is.
    pub role: Role,

    /// Key establishment.
    pub mode: HandshakeMode,

    /// Preferred packet size on the wire.
    pub packet_size: usize,

    /// How long [`start`](super::ProtocolEngine::start) waits for the
    /// handshake.
    pub handshake_timeout: Duration,

    /// Ping after this long without sending anything.
    pub keep_alive: Option<Duration>,

    /// Tear down after this long without receiving anything.
    pub idle_timeout: Option<Duration>,

    /// Start in low-latency mode.
    pub low_latency: bool,

    /// Lowest priority still scheduled while throttled.
    pub throttle_floor: Priority,
}

impl EngineConfig {
    /// Default configuration for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            mode: HandshakeMode::Authenticated(AuthConfig::new()),
            packet_size: DEFAULT_PACKET_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            keep_alive: Some(KEEPALIVE_INTERVAL),
            idle_timeout: None,
            low_latency: false,
            throttle_floor: Priority::from_bits(DEFAULT_THROTTLE_FLOOR),
        }
    }

    /// Start building a configuration for `role`.
    pub fn builder(role: Role) -> EngineConfigBuilder {
        EngineConfigBuilder::new(role)
    }

    /// Check the values against protocol limits.
    pub fn validate(&self) -> Result<(), QlicError> {
        if !(MIN_PACKET_SIZE..=MAX_PACKET_BODY).contains(&self.packet_size) {
            return Err(QlicError::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_PACKET_BODY}",
                self.packet_size
            )));
        }
        if self.handshake_timeout.is_zero() {
            return Err(QlicError::Config("handshake timeout must be non-zero".into()));
        }
        if self.keep_alive.is_some_and(|d| d.is_zero()) {
            return Err(QlicError::Config("keep-alive interval must be non-zero".into()));
        }
        if self.idle_timeout.is_some_and(|d| d.is_zero()) {
            return Err(QlicError::Config("idle timeout must be non-zero".into()));
        }
        if let HandshakeMode::PreSharedSecret(secret) = &self.mode {
            if secret.is_empty() {
                return Err(QlicError::Config("pre-shared secret is empty".into()));
            }
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a builder with default values.
    pub fn new(role: Role) -> Self {
        Self {
            config: EngineConfig::new(role),
        }
    }

    /// Authenticate with `auth`.
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.mode = HandshakeMode::Authenticated(auth);
        self
    }

    /// Skip the handshake and key from `secret`.
    pub fn pre_shared_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.config.mode = HandshakeMode::PreSharedSecret(secret.into());
        self
    }

    /// Set the packet size.
    pub fn packet_size(mut self, size: usize) -> Self {
        self.config.packet_size = size;
        self
    }

    /// Set the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set or disable keep-alive pings.
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.config.keep_alive = interval;
        self
    }

    /// Set or disable the receive idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Enable or disable low-latency mode.
    pub fn low_latency(mut self, enabled: bool) -> Self {
        self.config.low_latency = enabled;
        self
    }

    /// Set the throttling floor.
    pub fn throttle_floor(mut self, floor: Priority) -> Self {
        self.config.throttle_floor = floor;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<EngineConfig, QlicError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::builder(Role::Client).build().unwrap();
        assert_eq!(config.packet_size, DEFAULT_PACKET_SIZE);
        assert_eq!(config.keep_alive, Some(KEEPALIVE_INTERVAL));
        assert_eq!(config.throttle_floor, Priority::from_bits(4));
        assert!(!config.low_latency);
        assert!(matches!(config.mode, HandshakeMode::Authenticated(_)));
    }

    #[test]
    fn test_packet_size_bounds() {
        let err = EngineConfig::builder(Role::Server)
            .packet_size(MIN_PACKET_SIZE - 1)
            .build()
            .unwrap_err();
        assert!(matches!(err, QlicError::Config(_)));

        assert!(
            EngineConfig::builder(Role::Server)
                .packet_size(MIN_PACKET_SIZE)
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_empty_secret_rejected() {
        let err = EngineConfig::builder(Role::Client)
            .pre_shared_secret(Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, QlicError::Config(_)));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(
            EngineConfig::builder(Role::Client)
                .handshake_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
        assert!(
            EngineConfig::builder(Role::Client)
                .keep_alive(Some(Duration::ZERO))
                .build()
                .is_err()
        );
    }
}
