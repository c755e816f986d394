//! Packet codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding CoAP packets.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("token length invalid, should be in range 0..8, got {0}")]
    InvalidTokenLength(u8),

    #[error("unknown method code: 0.{0:02}")]
    UnknownMethod(u8),

    #[error("invalid code: {0}.{1:02}")]
    InvalidCode(u8, u8),

    #[error("reserved option nibble 15")]
    ReservedOptionNibble,

    #[error("option {number} value length {len} outside allowed range {min}..={max}")]
    OptionValueLength {
        number: u16,
        len: usize,
        min: usize,
        max: usize,
    },

    #[error("non-repeatable option {0} occurred more than once")]
    DuplicateOption(u16),

    #[error("option number exceeds 65535")]
    OptionNumberOverflow,

    #[error("payload marker not followed by payload")]
    EmptyPayload,

    #[error("message truncated")]
    Truncated,

    #[error("message type required for UDP serialization")]
    MissingMessageType,

    #[error("not enough data buffered")]
    InsufficientData,

    #[error("end of stream")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
