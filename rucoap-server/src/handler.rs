//! Request handler contract.

use crate::error::ServerError;
use rucoap_packet::Packet;

/// Produces the response for an inbound request.
///
/// The response must carry a response code and the request's token; the
/// dispatcher fills the token in when the handler leaves it empty. A handler
/// error becomes a 5.00 Internal Server Error on the wire.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Packet) -> Result<Packet, ServerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Packet) -> Result<Packet, ServerError> + Send + Sync,
{
    fn handle(&self, request: &Packet) -> Result<Packet, ServerError> {
        self(request)
    }
}
