use serde::{Deserialize, Serialize};

/// A renter-signed offer to store one shard for a time window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contract {
    pub renter_id: String,
    pub renter_signature: String,
    pub renter_hd_index: i64,
    pub renter_hd_key: String,
    pub farmer_id: Option<String>,
    pub farmer_signature: Option<String>,
    pub data_size: u64,
    pub data_hash: String,
    pub store_begin: i64,
    pub store_end: i64,
    pub audit_count: u64,
    pub payment_storage_price: i64,
    pub payment_download_price: i64,
    pub payment_destination: Option<String>,
    pub version: i64,
}

impl Contract {
    pub fn is_valid(&self) -> bool {
        !self.renter_id.is_empty()
            && !self.renter_signature.is_empty()
            && !self.data_hash.is_empty()
            && self.data_size > 0
            && self.store_begin > 0
            && self.store_begin < self.store_end
    }

    /// `audit_count` must be a non-zero power of two for the audit tree to
    /// halve cleanly toward its root.
    pub fn has_valid_audit_count(&self) -> bool {
        self.audit_count > 0 && self.audit_count & (self.audit_count - 1) == 0
    }

    /// Canonical JSON both parties sign: the two signature fields removed and
    /// keys in lexicographic order.
    pub fn signing_payload(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap();
        if let Some(object) = value.as_object_mut() {
            object.remove("renter_signature");
            object.remove("farmer_signature");
        }
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Contract {
        Contract {
            renter_id: "adc8d381d40eb0bd33f4f199f5658c5b92d23db4".to_string(),
            renter_signature: "c2ln".to_string(),
            data_size: 4096,
            data_hash: "5ef845e7cc8f7ca143b86fae2f836cf27d8496eb".to_string(),
            store_begin: 1_700_000_000_000,
            store_end: 1_700_086_400_000,
            audit_count: 4,
            ..Default::default()
        }
    }

    #[test]
    fn validity() {
        assert!(contract().is_valid());
        assert!(
            !Contract {
                renter_id: String::new(),
                ..contract()
            }
            .is_valid()
        );
        assert!(
            !Contract {
                data_size: 0,
                ..contract()
            }
            .is_valid()
        );
        assert!(
            !Contract {
                store_begin: 0,
                ..contract()
            }
            .is_valid()
        );
        // begin must strictly precede end
        assert!(
            !Contract {
                store_begin: 2,
                store_end: 2,
                ..contract()
            }
            .is_valid()
        );
    }

    #[test]
    fn audit_count_power_of_two() {
        for (count, ok) in [(0, false), (1, true), (2, true), (3, false), (4, true), (6, false)] {
            let contract = Contract {
                audit_count: count,
                ..contract()
            };
            assert_eq!(contract.has_valid_audit_count(), ok, "audit_count={count}");
        }
    }

    #[test]
    fn signing_payload_is_canonical() {
        let contract = Contract {
            farmer_signature: Some("ZmFybQ==".to_string()),
            ..contract()
        };
        let payload = contract.signing_payload();
        // signature fields are stripped, the rest is key-sorted
        assert_eq!(
            payload,
            concat!(
                "{\"audit_count\":4,",
                "\"data_hash\":\"5ef845e7cc8f7ca143b86fae2f836cf27d8496eb\",",
                "\"data_size\":4096,",
                "\"farmer_id\":null,",
                "\"payment_destination\":null,",
                "\"payment_download_price\":0,",
                "\"payment_storage_price\":0,",
                "\"renter_hd_index\":0,",
                "\"renter_hd_key\":\"\",",
                "\"renter_id\":\"adc8d381d40eb0bd33f4f199f5658c5b92d23db4\",",
                "\"store_begin\":1700000000000,",
                "\"store_end\":1700086400000,",
                "\"version\":0}"
            )
        );
    }

    #[test]
    fn unknown_wire_fields_are_tolerated() {
        let contract: Contract = serde_json::from_str(
            r#"{"data_hash":"aa","data_size":1,"store_begin":1,"store_end":2,"extra":true}"#,
        )
        .unwrap();
        assert_eq!(contract.data_hash, "aa");
        assert_eq!(contract.audit_count, 0);
    }
}
