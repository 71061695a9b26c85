use {
    crate::hash::ripemd160_sha256,
    secp256k1::{
        Message, PublicKey, SECP256K1, SecretKey,
        ecdsa::{RecoverableSignature, RecoveryId},
    },
};

/// Compact signatures carry `27 + recovery_id` in the header byte, plus 4 to
/// flag that the signer's public key is compressed.
const SIG_HEADER_BASE: u8 = 27;
const SIG_COMPRESSED_FLAG: u8 = 4;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key material is not valid hex")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid secp256k1 key or signature")]
    Secp(#[from] secp256k1::Error),
    #[error("signature has wrong length")]
    SignatureLength,
}

/// The node's signing capability.
///
/// Wraps the long-lived secp256k1 key; the raw scalar never leaves this type
/// after construction.
pub struct Signer {
    secret: SecretKey,
    public: PublicKey,
}

impl Signer {
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim())?;
        let secret = SecretKey::from_slice(&bytes)?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key(SECP256K1);
        Self { secret, public }
    }

    /// Produces the 65-byte compact signature `{27 + recovery_id + 4} || r ||
    /// s` over a 32-byte digest.
    pub fn sign(&self, digest: [u8; 32]) -> [u8; 65] {
        let msg = Message::from_digest(digest);
        let (recovery, compact) = SECP256K1
            .sign_ecdsa_recoverable(&msg, &self.secret)
            .serialize_compact();
        let mut out = [0u8; 65];
        out[0] = SIG_HEADER_BASE + recovery.to_i32() as u8 + SIG_COMPRESSED_FLAG;
        out[1..].copy_from_slice(&compact);
        out
    }

    /// Hex `RIPEMD160(SHA256(compressed public key))`, the node's network
    /// identity. Deterministic for a given key across restarts.
    pub fn node_id(&self) -> String {
        hex::encode(ripemd160_sha256(&self.public.serialize()))
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("node_id", &self.node_id())
            .finish()
    }
}

/// Generates a fresh secret scalar as hex. Only used when writing new
/// configuration templates; running nodes go through [`Signer`].
pub fn generate_secret_hex() -> String {
    hex::encode(SecretKey::new(&mut rand::thread_rng()).secret_bytes())
}

/// Recovers the signing node's id from a digest and a 65-byte compact
/// signature as produced by [`Signer::sign`].
pub fn recover_node_id(digest: [u8; 32], signature: &[u8]) -> Result<String, KeyError> {
    let signature: &[u8; 65] = signature
        .try_into()
        .map_err(|_| KeyError::SignatureLength)?;
    let header = signature[0].saturating_sub(SIG_HEADER_BASE + SIG_COMPRESSED_FLAG);
    let recovery = RecoveryId::from_i32(i32::from(header))?;
    let signature = RecoverableSignature::from_compact(&signature[1..], recovery)?;
    let public = SECP256K1.recover_ecdsa(&Message::from_digest(digest), &signature)?;
    Ok(hex::encode(ripemd160_sha256(&public.serialize())))
}
