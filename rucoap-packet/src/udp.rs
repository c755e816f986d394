//! CoAP over UDP framing (RFC 7252).
//!
//! Wire layout: a 4-byte fixed header `Ver(2) | T(2) | TKL(4) | Code(8) |
//! MessageID(16)`, the token, the options, then optionally the payload
//! marker and payload.

use crate::code::PacketCode;
use crate::error::PacketError;
use crate::opts::HeaderOptions;
use crate::packet::{MessageType, Packet};
use crate::reader::{ByteReader, ReadBytes};
use crate::{MAX_TOKEN_LEN, PAYLOAD_MARKER};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Protocol version carried by every datagram.
pub const VERSION: u8 = 1;

/// Serializes a packet into a datagram.
///
/// UDP messages always carry a type; a packet without one cannot be framed
/// and is rejected rather than silently defaulted.
pub fn encode(packet: &Packet) -> Result<BytesMut, PacketError> {
    let message_type = packet
        .message_type()
        .ok_or(PacketError::MissingMessageType)?;
    let token = packet.token();
    if token.len() > MAX_TOKEN_LEN {
        return Err(PacketError::InvalidTokenLength(token.len() as u8));
    }

    let mut buf = BytesMut::with_capacity(4 + token.len() + packet.payload().len() + 16);
    buf.put_u8((VERSION << 6) | (message_type.to_wire() << 4) | token.len() as u8);
    buf.put_u8(packet.code().to_byte());
    buf.put_u16(packet.message_id());
    buf.put_slice(token);
    packet.options().encode_into(&mut buf);
    if !packet.payload().is_empty() {
        buf.put_u8(PAYLOAD_MARKER);
        buf.put_slice(packet.payload());
    }
    Ok(buf)
}

/// Parses one whole datagram. A datagram that runs short is malformed, not a
/// retry case; there is no streaming on UDP.
pub fn decode(remote: SocketAddr, datagram: &[u8]) -> Result<Packet, PacketError> {
    match decode_inner(remote, datagram) {
        Err(PacketError::InsufficientData) => Err(PacketError::Truncated),
        other => other,
    }
}

fn decode_inner(remote: SocketAddr, datagram: &[u8]) -> Result<Packet, PacketError> {
    let mut reader = ByteReader::new(datagram);

    let first = reader.read_u8()?;
    let version = first >> 6;
    if version != VERSION {
        return Err(PacketError::UnsupportedVersion(version));
    }
    let message_type = MessageType::from_wire((first >> 4) & 0x3);
    let token_len = first & 0x0F;
    if token_len as usize > MAX_TOKEN_LEN {
        return Err(PacketError::InvalidTokenLength(token_len));
    }

    let code = PacketCode::from_byte(reader.read_u8()?)?;
    let message_id = reader.read_u16()?;
    let token = Bytes::from(reader.read_exact(token_len as usize)?);

    let remaining = reader.remaining();
    let (options, payload_len) = HeaderOptions::decode(&mut reader, remaining)?;
    let payload = if payload_len > 0 {
        Bytes::from(reader.read_exact(payload_len)?)
    } else {
        Bytes::new()
    };

    Ok(Packet::from_parts(
        remote,
        Some(message_type),
        message_id,
        token,
        code,
        options,
        payload,
    ))
}
