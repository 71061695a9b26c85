use {
    ripemd::Ripemd160,
    sha2::{Digest, Sha256},
};

/// Prefix of the Bitcoin signed-message envelope.
const MAGIC_PREFIX: &[u8] = b"Bitcoin Signed Message:\n";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// `RIPEMD160(SHA256(data))` — the digest behind node ids, shard hashes and
/// audit-tree leaves.
pub fn ripemd160_sha256(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// Double SHA-256 over the varint-framed magic envelope:
/// `varint(|prefix|) || prefix || varint(|msg|) || msg`.
///
/// Message signatures are always computed over this digest so that signed
/// payloads cannot collide with transaction data.
pub fn magic_hash(msg: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(MAGIC_PREFIX.len() + msg.len() + 10);
    write_varint(&mut buf, MAGIC_PREFIX.len() as u64);
    buf.extend_from_slice(MAGIC_PREFIX);
    write_varint(&mut buf, msg.len() as u64);
    buf.extend_from_slice(msg);
    sha256(&sha256(&buf))
}

/// Incremental SHA-256 for hashing shard files without buffering them.
///
/// Used with [`ripemd160`] to derive shard hashes and audit leaves from
/// streamed file contents.
#[derive(Default)]
pub struct Sha256Stream(Sha256);

impl Sha256Stream {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// Bitcoin compact-size encoding.
fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}
