//! The CoAP packet value.

use crate::code::{Code, Method, PacketCode};
use crate::opts::HeaderOptions;
use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

/// CoAP message types. Present in the UDP framing only; packets on a
/// reliable transport carry no type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    pub(crate) fn from_wire(value: u8) -> Self {
        match value & 0x3 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }

    pub(crate) fn to_wire(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Confirmable => "CON",
            MessageType::NonConfirmable => "NON",
            MessageType::Acknowledgement => "ACK",
            MessageType::Reset => "RST",
        };
        f.write_str(name)
    }
}

/// A single CoAP message bound to a remote endpoint.
///
/// Constructed through the builders below and treated as immutable once it
/// reaches a codec or the dispatch pipeline. New packets start with no
/// message type and message id zero, matching the reliable-transport wire
/// form; UDP senders add both via [`Packet::with_type`] and
/// [`Packet::with_message_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    remote: SocketAddr,
    message_type: Option<MessageType>,
    message_id: u16,
    token: Bytes,
    code: PacketCode,
    options: HeaderOptions,
    payload: Bytes,
}

impl Packet {
    /// An empty message (no code, no method): the CoAP ping shape.
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            message_type: None,
            message_id: 0,
            token: Bytes::new(),
            code: PacketCode::Empty,
            options: HeaderOptions::new(),
            payload: Bytes::new(),
        }
    }

    /// A request carrying the given method.
    pub fn request(remote: SocketAddr, method: Method) -> Self {
        Self {
            code: PacketCode::Method(method),
            ..Self::new(remote)
        }
    }

    /// A response or signaling message carrying the given code.
    pub fn response(remote: SocketAddr, code: Code) -> Self {
        Self {
            code: PacketCode::Code(code),
            ..Self::new(remote)
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_options(mut self, options: HeaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub(crate) fn from_parts(
        remote: SocketAddr,
        message_type: Option<MessageType>,
        message_id: u16,
        token: Bytes,
        code: PacketCode,
        options: HeaderOptions,
        payload: Bytes,
    ) -> Self {
        Self {
            remote,
            message_type,
            message_id,
            token,
            code,
            options,
            payload,
        }
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type
    }

    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn token(&self) -> &Bytes {
        &self.token
    }

    pub fn code(&self) -> PacketCode {
        self.code
    }

    pub fn method(&self) -> Option<Method> {
        self.code.method()
    }

    pub fn options(&self) -> &HeaderOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut HeaderOptions {
        &mut self.options
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Builds a response to this request: same remote, token and message id.
    /// A confirmable request yields a piggy-backed acknowledgement; on
    /// reliable transports the absent type carries over.
    pub fn response_to(&self, code: Code) -> Packet {
        let message_type = match self.message_type {
            Some(MessageType::Confirmable) => Some(MessageType::Acknowledgement),
            other => other,
        };
        Packet {
            remote: self.remote,
            message_type,
            message_id: self.message_id,
            token: self.token.clone(),
            code: PacketCode::Code(code),
            options: HeaderOptions::new(),
            payload: Bytes::new(),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(t) = self.message_type {
            write!(f, "{t} ")?;
        }
        write!(f, "{}", self.code)?;
        if self.message_type.is_some() {
            write!(f, " MID:{}", self.message_id)?;
        }
        if !self.token.is_empty() {
            write!(f, " Token:")?;
            for b in self.token.iter() {
                write!(f, "{b:02x}")?;
            }
        }
        if let Some(path) = self.options.uri_path() {
            write!(f, " {path}")?;
        }
        if !self.payload.is_empty() {
            write!(f, " pl({})", self.payload.len())?;
        }
        Ok(())
    }
}
