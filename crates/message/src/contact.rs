use serde::{Deserialize, Serialize};

/// Advertised locator of a peer.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub address: String,
    pub port: u16,
    #[serde(rename = "nodeID")]
    pub node_id: String,
    pub protocol: String,
}

impl Contact {
    /// A contact is usable only when all four fields are populated.
    pub fn is_valid(&self) -> bool {
        !self.address.is_empty()
            && self.port != 0
            && !self.node_id.is_empty()
            && !self.protocol.is_empty()
    }
}
