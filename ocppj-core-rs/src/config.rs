//! Engine and WebSocket configuration
//!
//! Constructed at startup and passed by value into an endpoint; there is no
//! process-wide state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::ocpp::Profile;

/// OCPP 1.6 JSON WebSocket subprotocol
pub const OCPP16_SUBPROTOCOL: &str = "ocpp1.6";

/// Source of fresh message ids. Clones share state, so ids stay unique
/// across every connection of one endpoint.
#[derive(Clone)]
pub enum MessageIdGenerator {
    /// Random UUID v4
    Uuid,
    /// Decimal counter starting at 1
    Sequential(Arc<AtomicU64>),
    Custom(Arc<dyn Fn() -> String + Send + Sync>),
}

impl MessageIdGenerator {
    pub fn sequential() -> Self {
        MessageIdGenerator::Sequential(Arc::new(AtomicU64::new(1)))
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        MessageIdGenerator::Custom(Arc::new(f))
    }

    pub fn next(&self) -> String {
        match self {
            MessageIdGenerator::Uuid => uuid::Uuid::new_v4().to_string(),
            MessageIdGenerator::Sequential(counter) => counter.fetch_add(1, Ordering::Relaxed).to_string(),
            MessageIdGenerator::Custom(f) => f(),
        }
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        MessageIdGenerator::Uuid
    }
}

impl fmt::Debug for MessageIdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageIdGenerator::Uuid => f.write_str("Uuid"),
            MessageIdGenerator::Sequential(counter) => f
                .debug_tuple("Sequential")
                .field(&counter.load(Ordering::Relaxed))
                .finish(),
            MessageIdGenerator::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Exchange engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a pending call waits for its CALLRESULT/CALLERROR
    pub call_timeout: Duration,

    /// Feature profiles registered for both directions
    pub profiles: Vec<Profile>,

    pub message_ids: MessageIdGenerator,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            profiles: vec![Profile::Core, Profile::FirmwareManagement],
            message_ids: MessageIdGenerator::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Replace the supported profiles
    pub fn with_profiles(mut self, profiles: &[Profile]) -> Self {
        self.profiles = profiles.to_vec();
        self
    }

    /// Set message id generator
    pub fn with_message_ids(mut self, generator: MessageIdGenerator) -> Self {
        self.message_ids = generator;
        self
    }
}

/// WebSocket binding configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub subprotocol: String,

    pub max_message_size: usize,

    pub max_frame_size: usize,

    /// Initial reconnect delay (charge point client)
    pub reconnect_delay: Duration,

    /// Maximum reconnect delay (exponential backoff cap)
    pub max_reconnect_delay: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            subprotocol: OCPP16_SUBPROTOCOL.to_string(),
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_delay: Duration::from_secs(300),
        }
    }
}

impl WsConfig {
    /// Set message and frame size limits
    pub fn with_limits(mut self, max_message_size: usize, max_frame_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self.max_frame_size = max_frame_size;
        self
    }

    /// Set reconnect backoff bounds
    pub fn with_reconnect(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }
}
