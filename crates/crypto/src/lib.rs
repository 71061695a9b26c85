//! Signing identity and hash primitives for the farmer protocol.
//!
//! Everything a peer needs to produce or check the protocol's digests lives
//! here: the Bitcoin-style magic-envelope hash used for message signatures,
//! the `RIPEMD160(SHA256(·))` digest used for node ids, shard hashes and
//! audit-tree leaves, and the [`Signer`] capability wrapping the node's
//! long-lived secp256k1 key.

mod hash;
mod signer;

pub use self::{
    hash::{Sha256Stream, magic_hash, ripemd160, ripemd160_sha256, sha256},
    signer::{KeyError, Signer, generate_secret_hex, recover_node_id},
};
