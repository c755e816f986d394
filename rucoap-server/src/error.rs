//! Endpoint error types.

use rucoap_packet::PacketError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the endpoint, directly or through transaction
/// callbacks.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("connection to {0} closed")]
    ConnectionClosed(SocketAddr),

    #[error("too many pending transactions")]
    TransactionLimit,

    #[error("transaction canceled")]
    Canceled,

    #[error("handler failed: {0}")]
    Handler(String),
}
