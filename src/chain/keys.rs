//! secp256k1 keys and signatures in Antelope string formats
//!
//! Private keys are accepted as legacy WIF (`5...`) or `PVT_K1_...`,
//! public keys as legacy `EOS...` or `PUB_K1_...`. Output always uses the
//! `K1` prefixed forms except [`PublicKey::to_legacy_string`].

use std::fmt;
use std::str::FromStr;

use k256::ecdsa::signature::hazmat::RandomizedPrehashSigner;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const WIF_VERSION: u8 = 0x80;
const LEGACY_PUB_PREFIX: &str = "EOS";
const K1_PRIVATE_PREFIX: &str = "PVT_K1_";
const K1_PUBLIC_PREFIX: &str = "PUB_K1_";
const K1_SIGNATURE_PREFIX: &str = "SIG_K1_";

/// Give up on finding a canonical signature after this many nonces
const MAX_SIGN_ATTEMPTS: usize = 256;

fn ripemd_checksum(data: &[u8], suffix: &[u8]) -> [u8; 4] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

fn double_sha_checksum(data: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    [second[0], second[1], second[2], second[3]]
}

fn encode_k1(prefix: &str, data: &[u8]) -> String {
    let mut buf = data.to_vec();
    buf.extend_from_slice(&ripemd_checksum(data, b"K1"));
    format!("{}{}", prefix, bs58::encode(buf).into_string())
}

fn decode_k1(encoded: &str, expected_len: usize) -> Result<Vec<u8>> {
    let raw = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("Invalid base58: {}", e)))?;
    if raw.len() != expected_len + 4 {
        return Err(Error::InvalidKey(format!("Unexpected key length {}", raw.len())));
    }
    let (data, checksum) = raw.split_at(expected_len);
    if ripemd_checksum(data, b"K1") != checksum {
        return Err(Error::InvalidKey("Checksum mismatch".into()));
    }
    Ok(data.to_vec())
}

#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Fresh random key from the OS RNG
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = SigningKey::from_slice(bytes)
            .map_err(|e| Error::InvalidKey(format!("Invalid secret scalar: {}", e)))?;
        Ok(Self { inner })
    }

    fn from_wif(wif: &str) -> Result<Self> {
        let raw = bs58::decode(wif)
            .into_vec()
            .map_err(|e| Error::InvalidKey(format!("Invalid base58: {}", e)))?;
        if raw.len() != 37 || raw[0] != WIF_VERSION {
            return Err(Error::InvalidKey("Not a WIF private key".into()));
        }
        let (payload, checksum) = raw.split_at(33);
        if double_sha_checksum(payload) != checksum {
            return Err(Error::InvalidKey("Checksum mismatch".into()));
        }
        Self::from_bytes(&payload[1..])
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Legacy WIF form, accepted by every wallet
    pub fn to_wif(&self) -> String {
        let mut buf = vec![WIF_VERSION];
        buf.extend_from_slice(&self.inner.to_bytes());
        let checksum = double_sha_checksum(&buf);
        buf.extend_from_slice(&checksum);
        bs58::encode(buf).into_string()
    }

    /// Sign a 32-byte digest, retrying nonces until the chain accepts the signature as canonical
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature> {
        let verifying_key = self.inner.verifying_key();

        for _ in 0..MAX_SIGN_ATTEMPTS {
            let sig: EcdsaSignature = self
                .inner
                .sign_prehash_with_rng(&mut OsRng, digest)
                .map_err(|e| Error::TransactionBuild(format!("Signing failed: {}", e)))?;
            let sig = sig.normalize_s().unwrap_or(sig);

            let recovery_id = RecoveryId::trial_recovery_from_prehash(verifying_key, digest, &sig)
                .map_err(|e| Error::TransactionBuild(format!("Recovery id failed: {}", e)))?;

            let mut bytes = [0u8; 65];
            bytes[0] = recovery_id.to_byte() + 27 + 4;
            bytes[1..].copy_from_slice(&sig.to_bytes());

            if is_canonical(&bytes) {
                return Ok(Signature { bytes });
            }
        }

        Err(Error::TransactionBuild("Could not produce a canonical signature".into()))
    }
}

impl FromStr for PrivateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix(K1_PRIVATE_PREFIX) {
            let data = decode_k1(rest, 32)?;
            Self::from_bytes(&data)
        } else {
            Self::from_wif(s)
        }
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_k1(K1_PRIVATE_PREFIX, &self.inner.to_bytes()))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// 33-byte compressed SEC1 point
    pub fn to_compressed(&self) -> [u8; 33] {
        let point = self.inner.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    fn from_compressed(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| Error::InvalidKey(format!("Invalid public key point: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn to_legacy_string(&self) -> String {
        let data = self.to_compressed();
        let mut buf = data.to_vec();
        buf.extend_from_slice(&ripemd_checksum(&data, b""));
        format!("{}{}", LEGACY_PUB_PREFIX, bs58::encode(buf).into_string())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix(K1_PUBLIC_PREFIX) {
            let data = decode_k1(rest, 33)?;
            return Self::from_compressed(&data);
        }
        let rest = s
            .strip_prefix(LEGACY_PUB_PREFIX)
            .ok_or_else(|| Error::InvalidKey(format!("Unknown public key format: {}", s)))?;
        let raw = bs58::decode(rest)
            .into_vec()
            .map_err(|e| Error::InvalidKey(format!("Invalid base58: {}", e)))?;
        if raw.len() != 37 {
            return Err(Error::InvalidKey(format!("Unexpected key length {}", raw.len())));
        }
        let (data, checksum) = raw.split_at(33);
        if ripemd_checksum(data, b"") != checksum {
            return Err(Error::InvalidKey("Checksum mismatch".into()));
        }
        Self::from_compressed(data)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_k1(K1_PUBLIC_PREFIX, &self.to_compressed()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

/// Recoverable signature: header byte then r and s
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; 65],
}

impl Signature {
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.bytes
    }

    /// Recover the signer of `digest`
    pub fn recover(&self, digest: &[u8; 32]) -> Result<PublicKey> {
        let recid = self.bytes[0]
            .checked_sub(27 + 4)
            .and_then(RecoveryId::from_byte)
            .ok_or_else(|| Error::InvalidKey("Bad recovery header".into()))?;
        let sig = EcdsaSignature::from_slice(&self.bytes[1..])
            .map_err(|e| Error::InvalidKey(format!("Bad signature: {}", e)))?;
        let inner = VerifyingKey::recover_from_prehash(digest, &sig, recid)
            .map_err(|e| Error::InvalidKey(format!("Recovery failed: {}", e)))?;
        Ok(PublicKey { inner })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_k1(K1_SIGNATURE_PREFIX, &self.bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

/// Neither r nor s may carry a high bit or a redundant leading zero
fn is_canonical(sig: &[u8; 65]) -> bool {
    (sig[1] & 0x80) == 0
        && !(sig[1] == 0 && (sig[2] & 0x80) == 0)
        && (sig[33] & 0x80) == 0
        && !(sig[33] == 0 && (sig[34] & 0x80) == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV_WIF: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";
    const DEV_PUB: &str = "EOS6MRyAjQq8ud7hVNYcfnVPJqcVpscN5So8BhtHuGYqET5GDW5CV";

    #[test]
    fn test_wif_to_public_key() {
        let key: PrivateKey = DEV_WIF.parse().unwrap();
        assert_eq!(key.public_key().to_legacy_string(), DEV_PUB);
        assert_eq!(key.to_wif(), DEV_WIF);
    }

    #[test]
    fn test_k1_formats_roundtrip() {
        let key: PrivateKey = DEV_WIF.parse().unwrap();
        let pvt = key.to_string();
        assert!(pvt.starts_with("PVT_K1_"));
        let reparsed: PrivateKey = pvt.parse().unwrap();
        assert_eq!(reparsed.public_key(), key.public_key());

        let public = key.public_key();
        let pub_k1 = public.to_string();
        assert!(pub_k1.starts_with("PUB_K1_"));
        assert_eq!(pub_k1.parse::<PublicKey>().unwrap(), public);
        assert_eq!(DEV_PUB.parse::<PublicKey>().unwrap(), public);
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut tampered = DEV_WIF.to_string();
        tampered.pop();
        tampered.push('4');
        assert!(tampered.parse::<PrivateKey>().is_err());
        assert!("not-a-key".parse::<PrivateKey>().is_err());
        assert!("EOS1111".parse::<PublicKey>().is_err());
    }

    #[test]
    fn test_signature_is_canonical_and_recoverable() {
        let key = PrivateKey::generate();
        let digest: [u8; 32] = Sha256::digest(b"transaction").into();
        let sig = key.sign_digest(&digest).unwrap();

        assert!(is_canonical(sig.as_bytes()));
        assert!(sig.to_string().starts_with("SIG_K1_"));
        assert_eq!(sig.recover(&digest).unwrap(), key.public_key());
    }
}
