//! Endpoint configuration.
//!
//! Defaults first, then environment variable overrides. Socket-level
//! settings belong to the transport, which is outside this crate.

/// Default cap on a single buffered inbound message (16 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Default cap on concurrently pending outgoing transactions.
pub const DEFAULT_MAX_PENDING_TRANSACTIONS: usize = 1024;

/// Tunables for a [`TcpEndpoint`](crate::TcpEndpoint).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Largest inbound message the endpoint will buffer before giving up on
    /// the remote's framing.
    pub max_message_size: usize,
    /// Outgoing requests are refused once this many transactions are
    /// outstanding.
    pub max_pending_transactions: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_pending_transactions: DEFAULT_MAX_PENDING_TRANSACTIONS,
        }
    }
}

impl EndpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_pending_transactions(mut self, limit: usize) -> Self {
        self.max_pending_transactions = limit;
        self
    }

    /// Defaults with environment variable overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(size) = env_usize("RUCOAP_MAX_MESSAGE_SIZE") {
            self.max_message_size = size;
        }
        if let Some(limit) = env_usize("RUCOAP_MAX_PENDING_TRANSACTIONS") {
            self.max_pending_transactions = limit;
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}
