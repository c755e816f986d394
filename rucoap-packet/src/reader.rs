//! Strict big-endian readers shared by the UDP and TCP codecs.
//!
//! Two entry points over the same primitives: [`ByteReader`] parses out of an
//! in-memory buffer and reports a short read as
//! [`PacketError::InsufficientData`] (the streaming peek path), while
//! [`StreamReader`] blocks on an [`std::io::Read`] until the bytes arrive and
//! reports a closed stream as [`PacketError::EndOfStream`].

use crate::error::PacketError;

/// Strict read primitives over a byte source. All integers are big-endian.
pub trait ReadBytes {
    /// Fills `buf` completely or fails without partial consumption guarantees.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), PacketError>;

    fn read_u8(&mut self) -> Result<u8, PacketError> {
        let mut b = [0u8; 1];
        self.read_into(&mut b)?;
        Ok(b[0])
    }

    fn read_u16(&mut self) -> Result<u16, PacketError> {
        let mut b = [0u8; 2];
        self.read_into(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u24(&mut self) -> Result<u32, PacketError> {
        let mut b = [0u8; 3];
        self.read_into(&mut b)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn read_u32(&mut self) -> Result<u32, PacketError> {
        let mut b = [0u8; 4];
        self.read_into(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Reads exactly `n` bytes.
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, PacketError> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }
}

/// Reader over a byte slice that never consumes past what it has.
///
/// A read beyond the end yields [`PacketError::InsufficientData`]; the caller
/// keeps the original buffer and may retry once more bytes arrive.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

impl ReadBytes for ByteReader<'_> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), PacketError> {
        if self.remaining() < buf.len() {
            return Err(PacketError::InsufficientData);
        }
        buf.copy_from_slice(&self.buf[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}

/// Blocking reader over an [`std::io::Read`].
///
/// Short reads block inside the underlying stream; end of stream surfaces as
/// [`PacketError::EndOfStream`].
pub struct StreamReader<R> {
    inner: R,
}

impl<R: std::io::Read> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: std::io::Read> ReadBytes for StreamReader<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), PacketError> {
        self.inner.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                PacketError::EndOfStream
            } else {
                PacketError::Io(e)
            }
        })
    }
}
