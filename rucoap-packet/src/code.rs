//! Request methods, response/signaling codes and the code-byte union.

use crate::error::PacketError;
use std::fmt;

/// CoAP request methods (RFC 7252 plus FETCH/PATCH/iPATCH from RFC 8132).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get = 1,
    Post = 2,
    Put = 3,
    Delete = 4,
    Fetch = 5,
    Patch = 6,
    IPatch = 7,
}

impl Method {
    /// Parses a method from its code byte (detail of class 0).
    ///
    /// The method range of the code byte spans 1..=10 on the wire, but only
    /// 1..=7 carry registered methods; the rest are rejected.
    pub fn from_byte(value: u8) -> Result<Self, PacketError> {
        match value {
            1 => Ok(Method::Get),
            2 => Ok(Method::Post),
            3 => Ok(Method::Put),
            4 => Ok(Method::Delete),
            5 => Ok(Method::Fetch),
            6 => Ok(Method::Patch),
            7 => Ok(Method::IPatch),
            _ => Err(PacketError::UnknownMethod(value)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Fetch => "FETCH",
            Method::Patch => "PATCH",
            Method::IPatch => "iPATCH",
        };
        f.write_str(name)
    }
}

/// A response or signaling code, `class.detail` with class 2..=7 and
/// detail 0..=31.
///
/// Codes outside the registered constants still construct and decode; whether
/// an unknown code is acceptable is a dispatch concern, not a codec one.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code {
    class: u8,
    detail: u8,
}

impl Code {
    pub const CREATED: Code = Code { class: 2, detail: 1 };
    pub const DELETED: Code = Code { class: 2, detail: 2 };
    pub const VALID: Code = Code { class: 2, detail: 3 };
    pub const CHANGED: Code = Code { class: 2, detail: 4 };
    pub const CONTENT: Code = Code { class: 2, detail: 5 };
    pub const CONTINUE: Code = Code { class: 2, detail: 31 };

    pub const BAD_REQUEST: Code = Code { class: 4, detail: 0 };
    pub const UNAUTHORIZED: Code = Code { class: 4, detail: 1 };
    pub const BAD_OPTION: Code = Code { class: 4, detail: 2 };
    pub const FORBIDDEN: Code = Code { class: 4, detail: 3 };
    pub const NOT_FOUND: Code = Code { class: 4, detail: 4 };
    pub const METHOD_NOT_ALLOWED: Code = Code { class: 4, detail: 5 };
    pub const NOT_ACCEPTABLE: Code = Code { class: 4, detail: 6 };
    pub const REQUEST_ENTITY_INCOMPLETE: Code = Code { class: 4, detail: 8 };
    pub const PRECONDITION_FAILED: Code = Code { class: 4, detail: 12 };
    pub const REQUEST_ENTITY_TOO_LARGE: Code = Code { class: 4, detail: 13 };
    pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code { class: 4, detail: 15 };

    pub const INTERNAL_SERVER_ERROR: Code = Code { class: 5, detail: 0 };
    pub const NOT_IMPLEMENTED: Code = Code { class: 5, detail: 1 };
    pub const BAD_GATEWAY: Code = Code { class: 5, detail: 2 };
    pub const SERVICE_UNAVAILABLE: Code = Code { class: 5, detail: 3 };
    pub const GATEWAY_TIMEOUT: Code = Code { class: 5, detail: 4 };
    pub const PROXYING_NOT_SUPPORTED: Code = Code { class: 5, detail: 5 };

    pub const CSM: Code = Code { class: 7, detail: 1 };
    pub const PING: Code = Code { class: 7, detail: 2 };
    pub const PONG: Code = Code { class: 7, detail: 3 };
    pub const RELEASE: Code = Code { class: 7, detail: 4 };
    pub const ABORT: Code = Code { class: 7, detail: 5 };

    /// Builds a code, validating the class and detail ranges.
    ///
    /// Class 0 is the request/empty space and class 1 is reserved, so neither
    /// is representable here; the empty message stays distinct from any code.
    pub fn new(class: u8, detail: u8) -> Result<Self, PacketError> {
        if !(2..=7).contains(&class) || detail > 31 {
            return Err(PacketError::InvalidCode(class, detail));
        }
        Ok(Code { class, detail })
    }

    pub fn from_byte(value: u8) -> Result<Self, PacketError> {
        Code::new(value >> 5, value & 0x1F)
    }

    pub fn to_byte(self) -> u8 {
        (self.class << 5) | self.detail
    }

    pub fn class(self) -> u8 {
        self.class
    }

    pub fn detail(self) -> u8 {
        self.detail
    }

    /// Signaling codes (7.xx) drive the reliable-transport sub-protocol.
    pub fn is_signaling(self) -> bool {
        self.class == 7
    }

    pub fn is_success(self) -> bool {
        self.class == 2
    }

    pub fn is_error(self) -> bool {
        self.class == 4 || self.class == 5
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class, self.detail)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({}.{:02})", self.class, self.detail)
    }
}

/// What the code byte of a packet holds: nothing (empty message), a request
/// method, or a response/signaling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCode {
    Empty,
    Method(Method),
    Code(Code),
}

impl PacketCode {
    /// Parses the code byte: 0 is the empty message, 1..=10 the method range,
    /// everything else a response or signaling code.
    pub fn from_byte(value: u8) -> Result<Self, PacketError> {
        match value {
            0 => Ok(PacketCode::Empty),
            1..=10 => Ok(PacketCode::Method(Method::from_byte(value)?)),
            _ => Ok(PacketCode::Code(Code::from_byte(value)?)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PacketCode::Empty => 0,
            PacketCode::Method(m) => m.to_byte(),
            PacketCode::Code(c) => c.to_byte(),
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, PacketCode::Empty)
    }

    pub fn is_request(self) -> bool {
        matches!(self, PacketCode::Method(_))
    }

    pub fn method(self) -> Option<Method> {
        match self {
            PacketCode::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn code(self) -> Option<Code> {
        match self {
            PacketCode::Code(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for PacketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketCode::Empty => f.write_str("EMPTY"),
            PacketCode::Method(m) => m.fmt(f),
            PacketCode::Code(c) => c.fmt(f),
        }
    }
}
