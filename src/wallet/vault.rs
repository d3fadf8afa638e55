//! Password-based encryption of private keys at rest
//!
//! AES-256-CBC with PKCS#7 padding. The key is SHA-256 of the password, the
//! IV is random per call, and the stored form is `hex(iv):hex(ciphertext)`.
//! There is no key escrow: losing the password loses the key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const DELIMITER: char = ':';
const IV_LEN: usize = 16;

fn derive_key(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// Encrypt `plaintext` under `password`
pub fn encrypt(plaintext: &str, password: &str) -> String {
    let key = derive_key(password);
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    format!("{}{}{}", hex::encode(iv), DELIMITER, hex::encode(ciphertext))
}

/// Decrypt a value produced by [`encrypt`].
///
/// `None` means wrong password or malformed input. An empty plaintext is
/// reported as `None` too, so callers never mistake it for a valid key.
pub fn decrypt(encrypted: &str, password: &str) -> Option<String> {
    let (iv_hex, ct_hex) = encrypted.split_once(DELIMITER)?;
    let iv: [u8; IV_LEN] = hex::decode(iv_hex).ok()?.try_into().ok()?;
    let ciphertext = hex::decode(ct_hex).ok()?;
    if ciphertext.is_empty() {
        return None;
    }

    let key = derive_key(password);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .ok()?;

    let text = String::from_utf8(plaintext).ok()?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "5KQwrPbwdL6PhXujxW37FSSQZ1JiwsST4cqQzDeyXtP79zkvFD3";

    #[test]
    fn test_roundtrip() {
        for (plain, password) in [(KEY, "correct horse"), ("x", "12345678"), ("ключ", "pässwörd")] {
            let encrypted = encrypt(plain, password);
            assert_eq!(decrypt(&encrypted, password).as_deref(), Some(plain));
        }
    }

    #[test]
    fn test_wrong_password_is_none() {
        let encrypted = encrypt(KEY, "password-one");
        assert_eq!(decrypt(&encrypted, "password-two"), None);
    }

    #[test]
    fn test_format_and_fresh_iv() {
        let a = encrypt(KEY, "password");
        let b = encrypt(KEY, "password");
        assert_ne!(a, b);

        let (iv, ct) = a.split_once(':').unwrap();
        assert_eq!(iv.len(), 32);
        assert_eq!(ct.len() % 32, 0);
    }

    #[test]
    fn test_malformed_input_is_none() {
        assert_eq!(decrypt("", "password"), None);
        assert_eq!(decrypt("nodelimiter", "password"), None);
        assert_eq!(decrypt("zz:zz", "password"), None);
        assert_eq!(decrypt("00112233445566778899aabbccddeeff:", "password"), None);
    }

    #[test]
    fn test_empty_plaintext_is_none() {
        let encrypted = encrypt("", "password");
        assert_eq!(decrypt(&encrypted, "password"), None);
    }
}
