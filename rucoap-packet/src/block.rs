//! Block-wise transfer option (RFC 7959), including the BERT extension for
//! reliable transports.

use crate::error::PacketError;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Block size carried in the SZX field. BERT shares the 1024-byte wire size
/// with szx 7 and permits multiple blocks per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSize {
    S16,
    S32,
    S64,
    S128,
    S256,
    S512,
    S1024,
    Bert,
}

impl BlockSize {
    /// Maps the low three bits of `szx` to a block size.
    pub fn from_szx(szx: u8) -> Self {
        match szx & 0x7 {
            0 => BlockSize::S16,
            1 => BlockSize::S32,
            2 => BlockSize::S64,
            3 => BlockSize::S128,
            4 => BlockSize::S256,
            5 => BlockSize::S512,
            6 => BlockSize::S1024,
            _ => BlockSize::Bert,
        }
    }

    pub fn szx(self) -> u8 {
        match self {
            BlockSize::S16 => 0,
            BlockSize::S32 => 1,
            BlockSize::S64 => 2,
            BlockSize::S128 => 3,
            BlockSize::S256 => 4,
            BlockSize::S512 => 5,
            BlockSize::S1024 => 6,
            BlockSize::Bert => 7,
        }
    }

    /// Block size in bytes; BERT blocks are 1024 bytes on the wire.
    pub fn size(self) -> usize {
        match self {
            BlockSize::Bert => 1024,
            _ => 16 << self.szx(),
        }
    }

    pub fn is_bert(self) -> bool {
        matches!(self, BlockSize::Bert)
    }
}

/// The Block1/Block2 option value: block number, size and more-flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockOption {
    number: u32,
    size: BlockSize,
    more: bool,
}

impl BlockOption {
    pub fn new(number: u32, size: BlockSize, more: bool) -> Self {
        Self { number, size, more }
    }

    pub fn number(self) -> u32 {
        self.number
    }

    pub fn block_size(self) -> BlockSize {
        self.size
    }

    /// Block size in bytes.
    pub fn size(self) -> usize {
        self.size.size()
    }

    pub fn more(self) -> bool {
        self.more
    }

    pub fn is_bert(self) -> bool {
        self.size.is_bert()
    }

    /// Decodes the variable-length unsigned integer form: low 3 bits SZX,
    /// bit 3 the more-flag, the rest the block number. Encodings shorter than
    /// the canonical width are accepted; the empty value is zero.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, PacketError> {
        if raw.len() > 3 {
            return Err(PacketError::OptionValueLength {
                number: 0,
                len: raw.len(),
                min: 0,
                max: 3,
            });
        }
        let value = raw.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
        Ok(Self {
            number: value >> 4,
            more: value & 0x8 != 0,
            size: BlockSize::from_szx((value & 0x7) as u8),
        })
    }

    /// Encodes to the minimal-width unsigned integer (1..=3 bytes).
    pub fn to_bytes(self) -> Bytes {
        let mut value = self.number << 4;
        if self.more {
            value |= 1 << 3;
        }
        value |= self.size.szx() as u32;

        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
        Bytes::copy_from_slice(&bytes[skip..])
    }

    /// Next block option with the number advanced by one, more-flag set from
    /// the full payload size.
    pub fn next_block(self, full_payload: &[u8]) -> BlockOption {
        self.next_bert_block(full_payload, 1)
    }

    /// Next block option advanced by `bert_blocks_per_message` blocks.
    pub fn next_bert_block(self, full_payload: &[u8], bert_blocks_per_message: u32) -> BlockOption {
        let next = self.number + bert_blocks_per_message;
        let more = full_payload.len() > (next as usize + 1) * self.size();
        BlockOption::new(next, self.size, more)
    }

    /// Slice of the full payload covered by this block, `None` when the block
    /// starts past the end of the payload.
    pub fn create_block_part(self, full_payload: &[u8]) -> Option<Bytes> {
        let start = self.number as usize * self.size();
        if start >= full_payload.len() {
            return None;
        }
        let end = (start + self.size()).min(full_payload.len());
        Some(Bytes::copy_from_slice(&full_payload[start..end]))
    }

    /// Appends a received block to the reassembly buffer and returns the
    /// number of blocks it contained (more than one under BERT).
    pub fn append_payload(self, buffer: &mut BytesMut, block: &[u8]) -> usize {
        buffer.extend_from_slice(block);
        block.len() / self.size()
    }
}

impl fmt::Display for BlockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.number,
            if self.more { "more" } else { "last" },
            self.size()
        )?;
        if self.is_bert() {
            write!(f, "|BERT")?;
        }
        Ok(())
    }
}
