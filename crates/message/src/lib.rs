//! Wire model of the farmer protocol.
//!
//! Messages are JSON-RPC-shaped envelopes over HTTP. Inbound bytes are probed
//! for their `method`/`id` first and then decoded into the closed [`Request`]
//! sum; outbound replies are built from the [`Response`] sum and signed
//! through the [`Signable`] surface.

mod contact;
mod contract;
mod request;
mod response;

pub use self::{
    contact::Contact,
    contract::Contract,
    request::{
        AuditChallenge, AuditParams, ConsignParams, ContactParams, Envelope, FindNodeParams,
        Inbound, Method, MirrorParams, OfferParams, PublishParams, Request, RetrieveParams,
        parse_request,
    },
    response::{
        Ack, AuditResponse, AuditResult, ErrorBody, ErrorResponse, NodesResponse, NodesResult,
        OfferResponse, OfferResult, ParseError, Response, ResponseIn, ResultBody, TokenResponse,
        TokenResult, parse_response,
    },
};

pub const JSON_RPC_VERSION: &str = "2.0";

/// Hex-encoded UUIDv4 bytes; used for message ids and transfer tokens.
pub fn fresh_id() -> String {
    hex::encode(uuid::Uuid::new_v4().as_bytes())
}

/// Mutation surface shared by outbound envelopes: responses echo request ids
/// and every signed body carries a nonce and a signature.
pub trait Signable {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn set_nonce(&mut self, nonce: i64);
    fn set_signature(&mut self, signature: String);
}
