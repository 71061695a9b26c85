use {
    crate::{
        Signable,
        contact::Contact,
        contract::Contract,
        request::Method,
    },
    serde::{Deserialize, Serialize},
};

/// Result carried by the generic OK response (PING, PROBE, PUBLISH, MIRROR).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultBody {
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub result: ResultBody,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub result: ResultBody,
    pub error: ErrorBody,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenResult {
    pub token: String,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

/// CONSIGN and RETRIEVE answer with a one-shot transfer token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub result: TokenResult,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesResult {
    pub nodes: Vec<Contact>,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodesResponse {
    #[serde(default)]
    pub result: NodesResult,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferResult {
    pub contract: Contract,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

/// The renter's answer to an outbound OFFER, carrying the countersigned
/// contract.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OfferResponse {
    #[serde(default)]
    pub result: OfferResult,
    #[serde(default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditResult {
    pub proofs: Vec<serde_json::Value>,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuditResponse {
    #[serde(default)]
    pub result: AuditResult,
    #[serde(default)]
    pub id: String,
}

/// The closed sum of responses a farmer writes.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Error(ErrorResponse),
    Ack(Ack),
    Token(TokenResponse),
    Nodes(NodesResponse),
    Audit(AuditResponse),
}

macro_rules! each_response {
    ($self:ident, $response:ident => $body:expr) => {
        match $self {
            Response::Error($response) => $body,
            Response::Ack($response) => $body,
            Response::Token($response) => $body,
            Response::Nodes($response) => $body,
            Response::Audit($response) => $body,
        }
    };
}

impl Response {
    pub fn ok(contact: Contact) -> Self {
        Self::Ack(Ack {
            result: ResultBody {
                contact,
                ..Default::default()
            },
            id: String::new(),
        })
    }

    pub fn error(contact: Contact, message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse {
            result: ResultBody {
                contact,
                ..Default::default()
            },
            error: ErrorBody {
                code: -1,
                message: message.into(),
            },
            id: String::new(),
        })
    }

    pub fn token(token: String, contact: Contact) -> Self {
        Self::Token(TokenResponse {
            result: TokenResult {
                token,
                contact,
                ..Default::default()
            },
            id: String::new(),
        })
    }

    pub fn nodes(contact: Contact) -> Self {
        Self::Nodes(NodesResponse {
            result: NodesResult {
                nodes: Vec::new(),
                contact,
                ..Default::default()
            },
            id: String::new(),
        })
    }

    pub fn audit(proofs: Vec<serde_json::Value>, contact: Contact) -> Self {
        Self::Audit(AuditResponse {
            result: AuditResult {
                proofs,
                contact,
                ..Default::default()
            },
            id: String::new(),
        })
    }
}

impl Signable for Response {
    fn id(&self) -> &str {
        each_response!(self, response => &response.id)
    }

    fn set_id(&mut self, id: String) {
        each_response!(self, response => response.id = id)
    }

    fn set_nonce(&mut self, nonce: i64) {
        each_response!(self, response => response.result.nonce = nonce)
    }

    fn set_signature(&mut self, signature: String) {
        each_response!(self, response => response.result.signature = signature)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no response shape for {0}")]
    UnexpectedMethod(Method),
}

/// A peer's answer to one of our outbound requests.
#[derive(Debug)]
pub enum ResponseIn {
    Error(ErrorResponse),
    Ack(Ack),
    Offer(OfferResponse),
    Nodes(NodesResponse),
}

/// Decodes the answer to an outbound request. An `error` member wins over the
/// method-specific result shape.
pub fn parse_response(method: Method, raw: &[u8]) -> Result<ResponseIn, ParseError> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    if value.get("error").is_some_and(|error| !error.is_null()) {
        return Ok(ResponseIn::Error(serde_json::from_value(value)?));
    }
    match method {
        Method::Ping | Method::Probe | Method::Publish => {
            Ok(ResponseIn::Ack(serde_json::from_value(value)?))
        }
        Method::Offer => Ok(ResponseIn::Offer(serde_json::from_value(value)?)),
        Method::FindNode => Ok(ResponseIn::Nodes(serde_json::from_value(value)?)),
        other => Err(ParseError::UnexpectedMethod(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact {
            address: "10.0.0.7".to_string(),
            port: 5003,
            node_id: "ab".to_string(),
            protocol: "1.2.0".to_string(),
        }
    }

    #[test]
    fn token_response_shape() {
        let mut response = Response::token("aabb".to_string(), contact());
        response.set_id("r1".to_string());
        response.set_nonce(7);
        response.set_signature("c2ln".to_string());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["result"]["token"], "aabb");
        assert_eq!(json["result"]["contact"]["nodeID"], "ab");
        assert_eq!(json["result"]["nonce"], 7);
        assert_eq!(json["result"]["signature"], "c2ln");
        assert_eq!(json["id"], "r1");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_response_shape() {
        let response = Response::error(contact(), "audit_tree is empty");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], -1);
        assert_eq!(json["error"]["message"], "audit_tree is empty");
        assert_eq!(json["result"]["contact"]["address"], "10.0.0.7");
    }

    #[test]
    fn find_node_answers_with_empty_nodes() {
        let json = serde_json::to_value(Response::nodes(contact())).unwrap();
        assert_eq!(json["result"]["nodes"], serde_json::json!([]));
    }

    #[test]
    fn error_member_wins_when_parsing() {
        let raw = br#"{"result":{},"error":{"code":-1,"message":"no contract"},"id":"x"}"#;
        match parse_response(Method::Offer, raw).unwrap() {
            ResponseIn::Error(error) => assert_eq!(error.error.message, "no contract"),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn offer_response_parses_the_contract() {
        let raw = br#"{"result":{"contract":{"data_hash":"aa","audit_count":4},"contact":{}},"id":"x"}"#;
        match parse_response(Method::Offer, raw).unwrap() {
            ResponseIn::Offer(offer) => {
                assert_eq!(offer.result.contract.data_hash, "aa");
                assert_eq!(offer.result.contract.audit_count, 4);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn consign_has_no_outbound_parser() {
        assert!(matches!(
            parse_response(Method::Consign, b"{}"),
            Err(ParseError::UnexpectedMethod(Method::Consign))
        ));
    }
}
