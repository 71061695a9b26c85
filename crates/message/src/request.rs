use {
    crate::{JSON_RPC_VERSION, Signable, contact::Contact, contract::Contract},
    serde::{Deserialize, Serialize},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Method {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PROBE")]
    Probe,
    #[serde(rename = "FIND_NODE")]
    FindNode,
    #[serde(rename = "PUBLISH")]
    Publish,
    #[serde(rename = "OFFER")]
    Offer,
    #[serde(rename = "CONSIGN")]
    Consign,
    #[serde(rename = "RETRIEVE")]
    Retrieve,
    #[serde(rename = "MIRROR")]
    Mirror,
    #[serde(rename = "AUDIT")]
    Audit,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Probe => "PROBE",
            Self::FindNode => "FIND_NODE",
            Self::Publish => "PUBLISH",
            Self::Offer => "OFFER",
            Self::Consign => "CONSIGN",
            Self::Retrieve => "RETRIEVE",
            Self::Mirror => "MIRROR",
            Self::Audit => "AUDIT",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One JSON-RPC request frame. Peers are lenient decoders: params members
/// fall back to their defaults when absent, but a frame without `params` is
/// not a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<P> {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: Method,
    pub params: P,
    #[serde(default)]
    pub id: String,
}

fn default_jsonrpc() -> String {
    JSON_RPC_VERSION.to_string()
}

impl<P> Envelope<P> {
    fn new(method: Method, params: P) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            method,
            params,
            id: String::new(),
        }
    }
}

/// Signature plumbing shared by every params shape.
pub trait SignedParams {
    fn set_nonce(&mut self, nonce: i64);
    fn set_signature(&mut self, signature: String);
}

macro_rules! impl_signed_params {
    ($($params:ty),* $(,)?) => {
        $(impl SignedParams for $params {
            fn set_nonce(&mut self, nonce: i64) {
                self.nonce = nonce;
            }

            fn set_signature(&mut self, signature: String) {
                self.signature = signature;
            }
        })*
    };
}

impl_signed_params!(
    ContactParams,
    FindNodeParams,
    PublishParams,
    OfferParams,
    ConsignParams,
    RetrieveParams,
    MirrorParams,
    AuditParams,
);

/// Params of PING and PROBE: just the caller's contact.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactParams {
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FindNodeParams {
    pub key: String,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishParams {
    pub uuid: String,
    pub topic: String,
    pub contents: Contract,
    pub publishers: Vec<String>,
    pub ttl: i64,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferParams {
    pub contract: Contract,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsignParams {
    pub data_hash: String,
    pub audit_tree: Vec<String>,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveParams {
    pub data_hash: String,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorParams {
    pub data_hash: String,
    pub token: String,
    pub farmer: Contact,
    pub contact: Contact,
    pub audit_tree: Vec<String>,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditParams {
    pub audits: Vec<AuditChallenge>,
    pub contact: Contact,
    pub nonce: i64,
    pub signature: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditChallenge {
    pub data_hash: String,
    pub challenge: String,
}

/// The closed sum of requests a farmer understands.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Request {
    Ping(Envelope<ContactParams>),
    Probe(Envelope<ContactParams>),
    FindNode(Envelope<FindNodeParams>),
    Publish(Envelope<PublishParams>),
    Offer(Envelope<OfferParams>),
    Consign(Envelope<ConsignParams>),
    Retrieve(Envelope<RetrieveParams>),
    Mirror(Envelope<MirrorParams>),
    Audit(Envelope<AuditParams>),
}

macro_rules! each_request {
    ($self:ident, $envelope:ident => $body:expr) => {
        match $self {
            Request::Ping($envelope) => $body,
            Request::Probe($envelope) => $body,
            Request::FindNode($envelope) => $body,
            Request::Publish($envelope) => $body,
            Request::Offer($envelope) => $body,
            Request::Consign($envelope) => $body,
            Request::Retrieve($envelope) => $body,
            Request::Mirror($envelope) => $body,
            Request::Audit($envelope) => $body,
        }
    };
}

impl Request {
    pub fn ping(contact: Contact) -> Self {
        Self::Ping(Envelope::new(
            Method::Ping,
            ContactParams {
                contact,
                ..Default::default()
            },
        ))
    }

    pub fn probe(contact: Contact) -> Self {
        Self::Probe(Envelope::new(
            Method::Probe,
            ContactParams {
                contact,
                ..Default::default()
            },
        ))
    }

    pub fn offer(contract: Contract, contact: Contact) -> Self {
        Self::Offer(Envelope::new(
            Method::Offer,
            OfferParams {
                contract,
                contact,
                ..Default::default()
            },
        ))
    }

    pub fn method(&self) -> Method {
        each_request!(self, envelope => envelope.method)
    }
}

impl Signable for Request {
    fn id(&self) -> &str {
        each_request!(self, envelope => &envelope.id)
    }

    fn set_id(&mut self, id: String) {
        each_request!(self, envelope => envelope.id = id)
    }

    fn set_nonce(&mut self, nonce: i64) {
        each_request!(self, envelope => envelope.params.set_nonce(nonce))
    }

    fn set_signature(&mut self, signature: String) {
        each_request!(self, envelope => envelope.params.set_signature(signature))
    }
}

/// Result of probing inbound bytes for a request.
#[derive(Debug)]
pub enum Inbound {
    Request(Request),
    /// Body that could not be decoded into a known request. Keeps whatever id
    /// the sender supplied so the error response can echo it.
    Unknown { id: Option<String> },
}

/// Decodes inbound control-channel bytes. The minimal envelope (`method`,
/// `id`) is probed first; only a known method is decoded into its variant.
pub fn parse_request(raw: &[u8]) -> Inbound {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
        return Inbound::Unknown { id: None };
    };
    let id = value
        .get("id")
        .and_then(|id| id.as_str())
        .map(str::to_owned);
    let Some(method) = value.get("method").and_then(|method| method.as_str()) else {
        return Inbound::Unknown { id };
    };
    let request = match method {
        "PING" => serde_json::from_value(value).map(Request::Ping),
        "PROBE" => serde_json::from_value(value).map(Request::Probe),
        "FIND_NODE" => serde_json::from_value(value).map(Request::FindNode),
        "PUBLISH" => serde_json::from_value(value).map(Request::Publish),
        "OFFER" => serde_json::from_value(value).map(Request::Offer),
        "CONSIGN" => serde_json::from_value(value).map(Request::Consign),
        "RETRIEVE" => serde_json::from_value(value).map(Request::Retrieve),
        "MIRROR" => serde_json::from_value(value).map(Request::Mirror),
        "AUDIT" => serde_json::from_value(value).map(Request::Audit),
        _ => return Inbound::Unknown { id },
    };
    match request {
        Ok(request) => Inbound::Request(request),
        Err(_) => Inbound::Unknown { id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        let raw = br#"{"jsonrpc":"2.0","method":"PING","params":{"contact":{"address":"10.0.0.7","port":5003,"nodeID":"ab","protocol":"1.2.0"}},"id":"a1"}"#;
        match parse_request(raw) {
            Inbound::Request(request @ Request::Ping(_)) => {
                assert_eq!(request.id(), "a1");
                assert_eq!(request.method(), Method::Ping);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn parses_consign_tree() {
        let raw = br#"{"method":"CONSIGN","params":{"data_hash":"aa","audit_tree":["11","22"]},"id":"c1"}"#;
        match parse_request(raw) {
            Inbound::Request(Request::Consign(envelope)) => {
                assert_eq!(envelope.params.data_hash, "aa");
                assert_eq!(envelope.params.audit_tree, vec!["11", "22"]);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn unknown_method_keeps_the_id() {
        match parse_request(br#"{"method":"STORE","id":"x9"}"#) {
            Inbound::Unknown { id } => assert_eq!(id.as_deref(), Some("x9")),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn missing_method_is_unknown() {
        assert!(matches!(
            parse_request(br#"{"id":"x9"}"#),
            Inbound::Unknown { id: Some(_) }
        ));
    }

    #[test]
    fn garbage_is_unknown_without_id() {
        assert!(matches!(
            parse_request(b"not json"),
            Inbound::Unknown { id: None }
        ));
    }

    #[test]
    fn outbound_requests_serialize_with_method_tag() {
        let mut request = Request::ping(Contact {
            address: "10.0.0.7".to_string(),
            port: 5003,
            node_id: "ab".to_string(),
            protocol: "1.2.0".to_string(),
        });
        request.set_id("feed".to_string());
        request.set_nonce(1_700_000_000_000_000_000);
        request.set_signature("c2ln".to_string());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "PING");
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], "feed");
        assert_eq!(json["params"]["nonce"], 1_700_000_000_000_000_000i64);
        assert_eq!(json["params"]["signature"], "c2ln");
    }
}
