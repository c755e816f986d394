//! CoAP over TCP framing (draft-ietf-core-coap-tcp-tls / RFC 8323).
//!
//! Wire layout: `Len(4) | TKL(4)`, an extended length field of 0, 1, 2 or 4
//! bytes, the code byte, the token, the options, then optionally the payload
//! marker and payload. The declared length counts the options, the marker
//! and the payload; the code byte and token are outside it. Message type and
//! message id do not exist on a reliable transport.

use crate::code::PacketCode;
use crate::error::PacketError;
use crate::opts::HeaderOptions;
use crate::packet::Packet;
use crate::reader::{ByteReader, ReadBytes, StreamReader};
use crate::{MAX_TOKEN_LEN, PAYLOAD_MARKER};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::SocketAddr;

/// Serializes a packet into the length-prefixed TCP layout, choosing the
/// minimal-width length encoding.
pub fn encode(packet: &Packet) -> Result<BytesMut, PacketError> {
    let token = packet.token();
    if token.len() > MAX_TOKEN_LEN {
        return Err(PacketError::InvalidTokenLength(token.len() as u8));
    }

    // Options are serialized up front: their size is part of the length field.
    let mut options = BytesMut::new();
    packet.options().encode_into(&mut options);

    let payload_len = packet.payload().len();
    let marker_len = usize::from(payload_len > 0);
    let length = options.len() + marker_len + payload_len;

    let mut buf = BytesMut::with_capacity(6 + token.len() + length);
    let nibble = length_nibble(length);
    buf.put_u8((nibble << 4) | token.len() as u8);
    match nibble {
        13 => buf.put_u8((length - 13) as u8),
        14 => buf.put_u16((length - 269) as u16),
        15 => buf.put_u32((length - 65805) as u32),
        _ => {}
    }
    buf.put_u8(packet.code().to_byte());
    buf.put_slice(token);
    buf.put_slice(&options);
    if payload_len > 0 {
        buf.put_u8(PAYLOAD_MARKER);
        buf.put_slice(packet.payload());
    }
    Ok(buf)
}

fn length_nibble(length: usize) -> u8 {
    if length < 13 {
        length as u8
    } else if length < 269 {
        13
    } else if length < 65805 {
        14
    } else {
        15
    }
}

fn read_extended_length<R: ReadBytes>(reader: &mut R, nibble: u8) -> Result<usize, PacketError> {
    match nibble {
        13 => Ok(reader.read_u8()? as usize + 13),
        14 => Ok(reader.read_u16()? as usize + 269),
        15 => Ok(reader.read_u32()? as usize + 65805),
        n => Ok(n as usize),
    }
}

fn decode_from<R: ReadBytes>(remote: SocketAddr, reader: &mut R) -> Result<Packet, PacketError> {
    let first = reader.read_u8()?;
    let token_len = first & 0x0F;
    if token_len as usize > MAX_TOKEN_LEN {
        return Err(PacketError::InvalidTokenLength(token_len));
    }
    let length = read_extended_length(reader, first >> 4)?;

    let code = PacketCode::from_byte(reader.read_u8()?)?;
    let token = Bytes::from(reader.read_exact(token_len as usize)?);

    let (options, payload_len) = HeaderOptions::decode(reader, length)?;
    let payload = if payload_len > 0 {
        Bytes::from(reader.read_exact(payload_len)?)
    } else {
        Bytes::new()
    };

    Ok(Packet::from_parts(
        remote, None, 0, token, code, options, payload,
    ))
}

/// Blocking deserialization off a stream: short reads wait for more bytes
/// inside the reader, a closed stream is [`PacketError::EndOfStream`].
pub fn read_from<R: std::io::Read>(remote: SocketAddr, stream: &mut R) -> Result<Packet, PacketError> {
    let mut reader = StreamReader::new(stream);
    decode_from(remote, &mut reader)
}

/// Reads just the length prefix of the next message, consuming it.
///
/// Useful for transports that size their receive buffers before pulling the
/// message body.
pub fn read_message_length<R: std::io::Read>(stream: &mut R) -> Result<usize, PacketError> {
    let mut reader = StreamReader::new(stream);
    let first = reader.read_u8()?;
    read_extended_length(&mut reader, first >> 4)
}

/// Incremental decoder over a growing byte buffer.
///
/// Bytes are appended as the transport delivers them; [`Decoder::decode`]
/// yields a packet once a whole one is buffered and consumes exactly its
/// bytes, or `Ok(None)` without consuming anything.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends received bytes to the buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops all buffered bytes. Used after a parse error, when the stream
    /// framing cannot be trusted any more.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Decodes the next packet if enough bytes are buffered.
    pub fn decode(&mut self, remote: SocketAddr) -> Result<Option<Packet>, PacketError> {
        let mut reader = ByteReader::new(&self.buffer);
        match decode_from(remote, &mut reader) {
            Ok(packet) => {
                let consumed = reader.position();
                self.buffer.advance(consumed);
                Ok(Some(packet))
            }
            Err(PacketError::InsufficientData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{Code, Method};

    fn remote() -> SocketAddr {
        "192.0.2.1:5683".parse().unwrap()
    }

    #[test]
    fn test_content_response_with_extended_length() {
        // 5 option bytes + marker + 300-byte payload = 306 -> nibble 14,
        // extended bytes 306 - 269 = 37.
        let mut packet = Packet::response(remote(), Code::CONTENT)
            .with_token(&[0x42][..])
            .with_payload(vec![0xA5u8; 300]);
        packet.options_mut().set_uri_path("/abcd").unwrap();

        let buf = encode(&packet).unwrap();
        assert_eq!(buf[0], 0xE1);
        assert_eq!(&buf[1..3], &[0x00, 0x25]);
        assert_eq!(buf[3], 0x45);
        assert_eq!(buf[4], 0x42);

        let decoded = decode_buf(&buf);
        assert_eq!(decoded, packet);
    }

    fn decode_buf(data: &[u8]) -> Packet {
        let mut decoder = Decoder::new();
        decoder.extend(data);
        let packet = decoder.decode(remote()).unwrap().unwrap();
        assert_eq!(decoder.buffered(), 0);
        packet
    }

    #[test]
    fn test_length_width_boundaries() {
        // Payload sizes chosen so that options + marker + payload hit the
        // encoding boundaries: lengths 12, 13, 268, 269, 65804, 65805.
        for (length, header_len) in [
            (0usize, 1usize),
            (12, 1),
            (13, 2),
            (268, 2),
            (269, 3),
            (65804, 3),
            (65805, 5),
        ] {
            let packet = if length == 0 {
                Packet::response(remote(), Code::CHANGED)
            } else {
                Packet::response(remote(), Code::CHANGED).with_payload(vec![0x11u8; length - 1])
            };
            let buf = encode(&packet).unwrap();
            // header byte + extension bytes, then the code byte
            assert_eq!(buf.len(), header_len + 1 + length, "length {length}");
            assert_eq!(decode_buf(&buf), packet, "length {length}");
        }
    }

    #[test]
    fn test_token_excluded_from_length() {
        let packet = Packet::request(remote(), Method::Get).with_token(&[1, 2, 3, 4, 5, 6, 7, 8][..]);
        let buf = encode(&packet).unwrap();
        // No options, no payload: declared length 0 despite 8 token bytes.
        assert_eq!(buf[0], 0x08);
        assert_eq!(buf.len(), 1 + 1 + 8);
        assert_eq!(decode_buf(&buf), packet);
    }

    #[test]
    fn test_empty_message() {
        let packet = Packet::new(remote());
        let buf = encode(&packet).unwrap();
        assert_eq!(&buf[..], &[0x00, 0x00]);
        assert!(decode_buf(&buf).code().is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_packet() {
        let mut packet = Packet::response(remote(), Code::CONTENT)
            .with_token(&[0xAA, 0xBB][..])
            .with_payload(&b"hello world!!"[..]);
        packet.options_mut().set_content_format(0).unwrap();
        let buf = encode(&packet).unwrap();
        // 2 length bytes, code, 2 token bytes, 1 option byte, marker, 13 payload bytes
        assert_eq!(buf.len(), 20);

        let mut decoder = Decoder::new();
        decoder.extend(&buf[..3]);
        assert!(decoder.decode(remote()).unwrap().is_none());
        assert_eq!(decoder.buffered(), 3);

        decoder.extend(&buf[3..]);
        let decoded = decoder.decode(remote()).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_multiple_packets() {
        let ping = Packet::response(remote(), Code::PING).with_token(&[0x01][..]);
        let request = Packet::request(remote(), Method::Get).with_token(&[0x02][..]);

        let mut decoder = Decoder::new();
        decoder.extend(&encode(&ping).unwrap());
        decoder.extend(&encode(&request).unwrap());

        assert_eq!(decoder.decode(remote()).unwrap().unwrap(), ping);
        assert_eq!(decoder.decode(remote()).unwrap().unwrap(), request);
        assert!(decoder.decode(remote()).unwrap().is_none());
    }

    #[test]
    fn test_decode_error_is_not_retryable() {
        // TKL 9 in the first byte.
        let mut decoder = Decoder::new();
        decoder.extend(&[0x09, 0x45]);
        assert!(matches!(
            decoder.decode(remote()),
            Err(PacketError::InvalidTokenLength(9))
        ));
    }

    #[test]
    fn test_clear_after_error() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0x09, 0x45, 0x01]);
        assert!(decoder.decode(remote()).is_err());
        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_read_from_stream() {
        let mut packet = Packet::request(remote(), Method::Post)
            .with_token(&[0x07][..])
            .with_payload(&b"body"[..]);
        packet.options_mut().set_uri_path("/x").unwrap();
        let buf = encode(&packet).unwrap();

        let mut cursor = std::io::Cursor::new(buf.to_vec());
        let decoded = read_from(remote(), &mut cursor).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_read_from_closed_stream() {
        let mut cursor = std::io::Cursor::new(vec![0xE1, 0x00]);
        assert!(matches!(
            read_from(remote(), &mut cursor),
            Err(PacketError::EndOfStream)
        ));
    }

    #[test]
    fn test_read_message_length() {
        let packet = Packet::response(remote(), Code::CONTENT).with_payload(vec![0u8; 300]);
        let buf = encode(&packet).unwrap();
        let mut cursor = std::io::Cursor::new(buf.to_vec());
        assert_eq!(read_message_length(&mut cursor).unwrap(), 301);
    }

    #[test]
    fn test_signal_roundtrip() {
        let pong = Packet::response(remote(), Code::PONG).with_token(&[0xDE, 0xAD][..]);
        let buf = encode(&pong).unwrap();
        let decoded = decode_buf(&buf);
        assert_eq!(decoded.code().code().unwrap(), Code::PONG);
        assert_eq!(decoded.token().as_ref(), &[0xDE, 0xAD]);
    }
}
