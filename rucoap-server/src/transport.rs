//! Transport abstraction consumed by the endpoint.
//!
//! Concrete socket bindings live outside this crate. Whoever owns the
//! sockets feeds inbound traffic to
//! [`TcpEndpoint::on_received`](crate::TcpEndpoint::on_received) and reports
//! closed connections via
//! [`TcpEndpoint::on_disconnected`](crate::TcpEndpoint::on_disconnected).

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;

/// Future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Outbound half of a reliable transport.
pub trait Transport: Send + Sync {
    /// Sends one serialized message to the remote endpoint. Resolves once
    /// the transport has accepted the bytes; a resolved error means the
    /// message was not sent.
    fn send(&self, data: Bytes, remote: SocketAddr) -> SendFuture<'_>;
}
