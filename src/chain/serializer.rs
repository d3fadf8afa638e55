//! Antelope binary encoding
//!
//! Little-endian integers, LEB128 varuint32 lengths, names as u64.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::asset::Asset;
use super::keys::PublicKey;
use super::name::Name;

/// Append-only writer for the packed wire format
#[derive(Debug, Default, Clone)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64(&mut self, v: i64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn varuint32(&mut self, mut v: u32) -> &mut Self {
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v > 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if v == 0 {
                break;
            }
        }
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.varuint32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub fn string(&mut self, v: &str) -> &mut Self {
        self.bytes(v.as_bytes())
    }

    pub fn name(&mut self, v: Name) -> &mut Self {
        self.u64(v.as_u64())
    }

    pub fn asset(&mut self, v: &Asset) -> &mut Self {
        self.i64(v.amount);
        self.u64(v.symbol.raw())
    }

    /// Key type 0 (K1) followed by the compressed point
    pub fn public_key(&mut self, v: &PublicKey) -> &mut Self {
        self.u8(0);
        self.buf.extend_from_slice(&v.to_compressed());
        self
    }

    /// Seconds since epoch as u32
    pub fn time_point_sec(&mut self, v: DateTime<Utc>) -> &mut Self {
        self.u32(v.timestamp() as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl PermissionLevel {
    pub fn new(actor: Name, permission: Name) -> Self {
        Self { actor, permission }
    }
}

/// One contract call with its already packed payload
#[derive(Debug, Clone)]
pub struct Action {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    pub data: Vec<u8>,
}

impl Action {
    fn pack(&self, p: &mut Packer) {
        p.name(self.account).name(self.name);
        p.varuint32(self.authorization.len() as u32);
        for auth in &self.authorization {
            p.name(auth.actor).name(auth.permission);
        }
        p.bytes(&self.data);
    }
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub expiration: DateTime<Utc>,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub actions: Vec<Action>,
}

impl Transaction {
    pub fn pack(&self) -> Vec<u8> {
        let mut p = Packer::new();
        p.time_point_sec(self.expiration)
            .u16(self.ref_block_num)
            .u32(self.ref_block_prefix)
            // max_net_usage_words, max_cpu_usage_ms, delay_sec
            .varuint32(0)
            .u8(0)
            .varuint32(0)
            // context_free_actions
            .varuint32(0);
        p.varuint32(self.actions.len() as u32);
        for action in &self.actions {
            action.pack(&mut p);
        }
        // transaction_extensions
        p.varuint32(0);
        p.into_bytes()
    }

    /// Digest the chain signs over: chain id, packed trx, empty context-free data hash
    pub fn signing_digest(&self, chain_id: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(self.pack());
        hasher.update([0u8; 32]);
        hasher.finalize().into()
    }

    /// Transaction id as reported by the chain
    pub fn id(&self) -> String {
        hex::encode(Sha256::digest(self.pack()))
    }
}
