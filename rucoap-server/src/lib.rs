//! # rucoap-server
//!
//! CoAP endpoint dispatch for reliable (TCP-style) transports.
//!
//! This crate provides:
//! - [`TcpEndpoint`]: the receive pipeline classifying pings, signaling
//!   messages, requests and responses, and the outgoing-request path
//! - The delayed transaction table pairing responses with requests by
//!   (token, remote)
//! - The [`Transport`] and [`RequestHandler`] contracts at the crate's edges
//!
//! Socket ownership stays outside: the transport owner pushes received bytes
//! into [`TcpEndpoint::on_received`] and reports closed connections through
//! [`TcpEndpoint::on_disconnected`].

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod transaction;
pub mod transport;

pub use config::EndpointConfig;
pub use error::ServerError;
pub use handler::RequestHandler;
pub use server::{EndpointStats, TcpEndpoint};
pub use transaction::{TransactionCallback, TransactionId, Transactions};
pub use transport::{SendFuture, Transport};
