//! Header options: the ordered option container and its delta-based codec.
//!
//! Wire format per RFC 7252 section 3.1: each option is a header byte
//! `(delta_nibble << 4) | length_nibble`, optional extended delta bytes,
//! optional extended length bytes, then the value. Nibbles 0..=12 encode the
//! quantity directly, 13 adds one extension byte (value + 13), 14 adds two
//! (value + 269), 15 is reserved for the payload marker.

use crate::block::BlockOption;
use crate::error::PacketError;
use crate::reader::ReadBytes;
use crate::PAYLOAD_MARKER;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Registered option numbers.
pub mod number {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const IF_NONE_MATCH: u16 = 5;
    pub const OBSERVE: u16 = 6;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const LOCATION_QUERY: u16 = 20;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE2: u16 = 28;
    pub const PROXY_URI: u16 = 35;
    pub const PROXY_SCHEME: u16 = 39;
    pub const SIZE1: u16 = 60;
}

/// Largest value length representable by the option length encoding.
const MAX_OPTION_VALUE_LEN: usize = 65804;

/// Critical options must be understood by the receiver; criticality is
/// carried in the low bit of the option number.
pub fn is_critical(number: u16) -> bool {
    number & 1 == 1
}

/// Whether the option may occur more than once in a message.
pub fn is_repeatable(number: u16) -> bool {
    matches!(
        number,
        number::IF_MATCH
            | number::ETAG
            | number::LOCATION_PATH
            | number::URI_PATH
            | number::URI_QUERY
            | number::LOCATION_QUERY
    )
}

/// Registered value length range for an option number; unknown numbers get
/// the full representable range.
pub fn value_len_range(number: u16) -> (usize, usize) {
    match number {
        number::IF_MATCH => (0, 8),
        number::URI_HOST => (1, 255),
        number::ETAG => (1, 8),
        number::IF_NONE_MATCH => (0, 0),
        number::OBSERVE => (0, 3),
        number::URI_PORT => (0, 2),
        number::LOCATION_PATH => (0, 255),
        number::URI_PATH => (0, 255),
        number::CONTENT_FORMAT => (0, 2),
        number::MAX_AGE => (0, 4),
        number::URI_QUERY => (0, 255),
        number::ACCEPT => (0, 2),
        number::LOCATION_QUERY => (0, 255),
        number::BLOCK2 => (0, 3),
        number::BLOCK1 => (0, 3),
        number::SIZE2 => (0, 4),
        number::PROXY_URI => (1, 1034),
        number::PROXY_SCHEME => (1, 255),
        number::SIZE1 => (0, 4),
        _ => (0, MAX_OPTION_VALUE_LEN),
    }
}

fn check_value_len(number: u16, len: usize) -> Result<(), PacketError> {
    let (min, max) = value_len_range(number);
    if len < min || len > max {
        return Err(PacketError::OptionValueLength {
            number,
            len,
            min,
            max,
        });
    }
    Ok(())
}

/// Ordered container of header options, keyed by option number.
///
/// Iteration and serialization always run in ascending number order;
/// repeatable options keep their values in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOptions {
    options: BTreeMap<u16, Vec<Bytes>>,
}

impl HeaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, validating the registered length range and rejecting a
    /// second value for non-repeatable options.
    pub fn insert(&mut self, number: u16, value: impl Into<Bytes>) -> Result<(), PacketError> {
        let value = value.into();
        check_value_len(number, value.len())?;
        let values = self.options.entry(number).or_default();
        if !values.is_empty() && !is_repeatable(number) {
            return Err(PacketError::DuplicateOption(number));
        }
        values.push(value);
        Ok(())
    }

    /// Replaces all values of an option with a single one.
    pub fn set(&mut self, number: u16, value: impl Into<Bytes>) -> Result<(), PacketError> {
        let value = value.into();
        check_value_len(number, value.len())?;
        self.options.insert(number, vec![value]);
        Ok(())
    }

    /// Appends a decoded value. Length ranges are enforced; duplicates of
    /// non-repeatable options are kept, leaving their handling to dispatch.
    fn push_decoded(&mut self, number: u16, value: Bytes) -> Result<(), PacketError> {
        check_value_len(number, value.len())?;
        self.options.entry(number).or_default().push(value);
        Ok(())
    }

    /// First value of an option, if present.
    pub fn get(&self, number: u16) -> Option<&Bytes> {
        self.options.get(&number).and_then(|v| v.first())
    }

    /// All values of an option, empty when absent.
    pub fn get_all(&self, number: u16) -> &[Bytes] {
        self.options.get(&number).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, number: u16) -> bool {
        self.options.contains_key(&number)
    }

    pub fn remove(&mut self, number: u16) -> bool {
        self.options.remove(&number).is_some()
    }

    /// Iterates `(number, value)` pairs in ascending number order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Bytes)> {
        self.options
            .iter()
            .flat_map(|(&n, values)| values.iter().map(move |v| (n, v)))
    }

    /// Total number of option values.
    pub fn len(&self) -> usize {
        self.options.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    // --- typed accessors ---

    /// Uri-Path segments joined with `/`, with a leading slash.
    pub fn uri_path(&self) -> Option<String> {
        let segments = self.get_all(number::URI_PATH);
        if segments.is_empty() {
            return None;
        }
        let mut path = String::new();
        for seg in segments {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(seg));
        }
        Some(path)
    }

    /// Splits `path` on `/` into Uri-Path segments, replacing any present.
    pub fn set_uri_path(&mut self, path: &str) -> Result<(), PacketError> {
        self.options.remove(&number::URI_PATH);
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.insert(number::URI_PATH, Bytes::copy_from_slice(seg.as_bytes()))?;
        }
        Ok(())
    }

    /// Uri-Query parameters joined with `&`.
    pub fn uri_query(&self) -> Option<String> {
        let params = self.get_all(number::URI_QUERY);
        if params.is_empty() {
            return None;
        }
        Some(
            params
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>()
                .join("&"),
        )
    }

    pub fn set_uri_query(&mut self, query: &str) -> Result<(), PacketError> {
        self.options.remove(&number::URI_QUERY);
        for param in query.split('&').filter(|s| !s.is_empty()) {
            self.insert(number::URI_QUERY, Bytes::copy_from_slice(param.as_bytes()))?;
        }
        Ok(())
    }

    pub fn uri_host(&self) -> Option<String> {
        self.get(number::URI_HOST)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_uri_host(&mut self, host: &str) -> Result<(), PacketError> {
        self.set(number::URI_HOST, Bytes::copy_from_slice(host.as_bytes()))
    }

    pub fn uri_port(&self) -> Option<u16> {
        self.get(number::URI_PORT).map(|v| decode_uint(v) as u16)
    }

    pub fn set_uri_port(&mut self, port: u16) -> Result<(), PacketError> {
        self.set(number::URI_PORT, encode_uint(port as u32))
    }

    pub fn location_path(&self) -> Option<String> {
        let segments = self.get_all(number::LOCATION_PATH);
        if segments.is_empty() {
            return None;
        }
        let mut path = String::new();
        for seg in segments {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(seg));
        }
        Some(path)
    }

    pub fn set_location_path(&mut self, path: &str) -> Result<(), PacketError> {
        self.options.remove(&number::LOCATION_PATH);
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.insert(
                number::LOCATION_PATH,
                Bytes::copy_from_slice(seg.as_bytes()),
            )?;
        }
        Ok(())
    }

    pub fn location_query(&self) -> Option<String> {
        let params = self.get_all(number::LOCATION_QUERY);
        if params.is_empty() {
            return None;
        }
        Some(
            params
                .iter()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .collect::<Vec<_>>()
                .join("&"),
        )
    }

    pub fn content_format(&self) -> Option<u16> {
        self.get(number::CONTENT_FORMAT)
            .map(|v| decode_uint(v) as u16)
    }

    pub fn set_content_format(&mut self, format: u16) -> Result<(), PacketError> {
        self.set(number::CONTENT_FORMAT, encode_uint(format as u32))
    }

    pub fn accept(&self) -> Option<u16> {
        self.get(number::ACCEPT).map(|v| decode_uint(v) as u16)
    }

    pub fn set_accept(&mut self, format: u16) -> Result<(), PacketError> {
        self.set(number::ACCEPT, encode_uint(format as u32))
    }

    pub fn max_age(&self) -> Option<u32> {
        self.get(number::MAX_AGE).map(|v| decode_uint(v))
    }

    pub fn set_max_age(&mut self, seconds: u32) -> Result<(), PacketError> {
        self.set(number::MAX_AGE, encode_uint(seconds))
    }

    pub fn observe(&self) -> Option<u32> {
        self.get(number::OBSERVE).map(|v| decode_uint(v))
    }

    pub fn set_observe(&mut self, value: u32) -> Result<(), PacketError> {
        self.set(number::OBSERVE, encode_uint(value))
    }

    pub fn etag(&self) -> Option<&Bytes> {
        self.get(number::ETAG)
    }

    pub fn set_etag(&mut self, etag: impl Into<Bytes>) -> Result<(), PacketError> {
        self.set(number::ETAG, etag)
    }

    pub fn if_match(&self) -> &[Bytes] {
        self.get_all(number::IF_MATCH)
    }

    pub fn add_if_match(&mut self, etag: impl Into<Bytes>) -> Result<(), PacketError> {
        self.insert(number::IF_MATCH, etag)
    }

    pub fn if_none_match(&self) -> bool {
        self.contains(number::IF_NONE_MATCH)
    }

    pub fn set_if_none_match(&mut self) -> Result<(), PacketError> {
        self.set(number::IF_NONE_MATCH, Bytes::new())
    }

    pub fn block1(&self) -> Result<Option<BlockOption>, PacketError> {
        self.get(number::BLOCK1)
            .map(|v| BlockOption::from_bytes(v))
            .transpose()
    }

    pub fn set_block1(&mut self, block: BlockOption) -> Result<(), PacketError> {
        self.set(number::BLOCK1, block.to_bytes())
    }

    pub fn block2(&self) -> Result<Option<BlockOption>, PacketError> {
        self.get(number::BLOCK2)
            .map(|v| BlockOption::from_bytes(v))
            .transpose()
    }

    pub fn set_block2(&mut self, block: BlockOption) -> Result<(), PacketError> {
        self.set(number::BLOCK2, block.to_bytes())
    }

    pub fn size1(&self) -> Option<u32> {
        self.get(number::SIZE1).map(|v| decode_uint(v))
    }

    pub fn set_size1(&mut self, size: u32) -> Result<(), PacketError> {
        self.set(number::SIZE1, encode_uint(size))
    }

    pub fn size2(&self) -> Option<u32> {
        self.get(number::SIZE2).map(|v| decode_uint(v))
    }

    pub fn set_size2(&mut self, size: u32) -> Result<(), PacketError> {
        self.set(number::SIZE2, encode_uint(size))
    }

    pub fn proxy_uri(&self) -> Option<String> {
        self.get(number::PROXY_URI)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_proxy_uri(&mut self, uri: &str) -> Result<(), PacketError> {
        self.set(number::PROXY_URI, Bytes::copy_from_slice(uri.as_bytes()))
    }

    pub fn proxy_scheme(&self) -> Option<String> {
        self.get(number::PROXY_SCHEME)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn set_proxy_scheme(&mut self, scheme: &str) -> Result<(), PacketError> {
        self.set(
            number::PROXY_SCHEME,
            Bytes::copy_from_slice(scheme.as_bytes()),
        )
    }

    // --- codec ---

    /// Serializes all options in ascending number order. The payload marker
    /// is the framing codec's concern and is not written here.
    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        let mut prev: u16 = 0;
        for (&number, values) in &self.options {
            for value in values {
                let delta = number - prev;
                let (delta_nibble, delta_ext) = split_ext(delta as u32);
                let (len_nibble, len_ext) = split_ext(value.len() as u32);
                buf.put_u8((delta_nibble << 4) | len_nibble);
                put_ext(buf, delta_ext);
                put_ext(buf, len_ext);
                buf.put_slice(value);
                prev = number;
            }
        }
    }

    /// Deserializes options bounded by `length` (bytes left in the message
    /// after the token). Returns the container and the number of bytes left
    /// for the payload: zero when the message ends after the options, the
    /// count following the payload marker otherwise.
    pub(crate) fn decode<R: ReadBytes>(
        reader: &mut R,
        length: usize,
    ) -> Result<(Self, usize), PacketError> {
        let mut options = HeaderOptions::new();
        let mut remaining = length;
        let mut num: u16 = 0;

        while remaining > 0 {
            let header = reader.read_u8()?;
            remaining -= 1;

            if header == PAYLOAD_MARKER {
                if remaining == 0 {
                    return Err(PacketError::EmptyPayload);
                }
                return Ok((options, remaining));
            }

            let delta = read_ext(reader, header >> 4, &mut remaining)?;
            let len = read_ext(reader, header & 0x0F, &mut remaining)? as usize;

            let next = num as u32 + delta;
            if next > u16::MAX as u32 {
                return Err(PacketError::OptionNumberOverflow);
            }
            num = next as u16;

            if len > remaining {
                return Err(PacketError::Truncated);
            }
            let value = reader.read_exact(len)?;
            remaining -= len;

            options.push_decoded(num, Bytes::from(value))?;
        }

        Ok((options, 0))
    }
}

enum Ext {
    None,
    One(u8),
    Two(u16),
}

/// Splits a delta or length into its nibble and extension encoding, using the
/// minimal width.
fn split_ext(value: u32) -> (u8, Ext) {
    if value < 13 {
        (value as u8, Ext::None)
    } else if value < 269 {
        (13, Ext::One((value - 13) as u8))
    } else {
        (14, Ext::Two((value - 269) as u16))
    }
}

fn put_ext(buf: &mut BytesMut, ext: Ext) {
    match ext {
        Ext::None => {}
        Ext::One(b) => buf.put_u8(b),
        Ext::Two(v) => buf.put_u16(v),
    }
}

/// Resolves an extended delta or length nibble, consuming from the bounded
/// remaining-length counter.
fn read_ext<R: ReadBytes>(
    reader: &mut R,
    nibble: u8,
    remaining: &mut usize,
) -> Result<u32, PacketError> {
    match nibble {
        13 => {
            if *remaining < 1 {
                return Err(PacketError::Truncated);
            }
            *remaining -= 1;
            Ok(reader.read_u8()? as u32 + 13)
        }
        14 => {
            if *remaining < 2 {
                return Err(PacketError::Truncated);
            }
            *remaining -= 2;
            Ok(reader.read_u16()? as u32 + 269)
        }
        15 => Err(PacketError::ReservedOptionNibble),
        n => Ok(n as u32),
    }
}

/// Minimal-length big-endian unsigned integer, as CoAP uint option values are
/// encoded. Zero becomes the empty value.
fn encode_uint(value: u32) -> Bytes {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    Bytes::copy_from_slice(&bytes[skip..])
}

fn decode_uint(raw: &[u8]) -> u32 {
    raw.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}
