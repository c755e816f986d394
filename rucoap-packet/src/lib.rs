//! # rucoap-packet
//!
//! Wire codec for CoAP (Constrained Application Protocol) messages.
//!
//! This crate provides:
//! - The [`Packet`] value and its code/method union
//! - The ordered option container with delta-based packing
//! - Block-wise transfer options (RFC 7959) including BERT
//! - UDP framing (RFC 7252) in [`udp`]
//! - Length-prefixed TCP framing (RFC 8323) in [`tcp`], with an incremental
//!   [`Decoder`] for streaming sockets
//!
//! The codec is pure: it never touches sockets and is safe to call from any
//! thread.

pub mod block;
pub mod code;
pub mod error;
pub mod opts;
pub mod packet;
pub mod reader;
pub mod tcp;
pub mod udp;

pub use block::{BlockOption, BlockSize};
pub use code::{Code, Method, PacketCode};
pub use error::PacketError;
pub use opts::HeaderOptions;
pub use packet::{MessageType, Packet};
pub use tcp::Decoder;

/// The single byte separating options from a non-empty payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Maximum token length in bytes; the 4-bit TKL values 9..=15 are reserved.
pub const MAX_TOKEN_LEN: usize = 8;

/// Default CoAP port.
pub const DEFAULT_PORT: u16 = 5683;
