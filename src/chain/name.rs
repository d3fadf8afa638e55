//! Antelope account and action names
//!
//! Names are up to 12 characters from `.12345a-z` (a 13th character is
//! allowed from `.1-5a-j`) packed into a u64, five bits per character.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

const CHARMAP: &[u8] = b".12345abcdefghijklmnopqrstuvwxyz";

/// Characters a generated account name may contain
const ACCOUNT_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz12345";

/// Length of a standard account name
pub const ACCOUNT_NAME_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u64);

const fn const_symbol(c: u8) -> u64 {
    match c {
        b'a'..=b'z' => (c - b'a') as u64 + 6,
        b'1'..=b'5' => (c - b'1') as u64 + 1,
        b'.' => 0,
        _ => panic!("invalid name character"),
    }
}

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

impl Name {
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Compile-time name for well-known contracts and actions, at most 12 chars
    pub const fn from_static(s: &str) -> Self {
        let bytes = s.as_bytes();
        assert!(bytes.len() <= 12, "name too long");
        let mut value = 0u64;
        let mut i = 0;
        while i < bytes.len() {
            value |= (const_symbol(bytes[i]) & 0x1f) << (64 - 5 * (i as u64 + 1));
            i += 1;
        }
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Parse a name, rejecting anything that would not round-trip
    pub fn new(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 13 {
            return Err(Error::InvalidInput(format!("Invalid name length: {}", s)));
        }

        let bytes = s.as_bytes();
        let mut value: u64 = 0;

        for i in 0..=12 {
            let mut c: u64 = 0;
            if i < bytes.len() {
                c = char_to_symbol(bytes[i])
                    .ok_or_else(|| Error::InvalidInput(format!("Invalid character in name: {}", s)))?;
            }

            if i < 12 {
                c &= 0x1f;
                c <<= 64 - 5 * (i as u64 + 1);
            } else {
                if c > 0x0f {
                    return Err(Error::InvalidInput(format!("Invalid 13th character in name: {}", s)));
                }
                c &= 0x0f;
            }
            value |= c;
        }

        let name = Name(value);
        if name.to_string() != s {
            return Err(Error::InvalidInput(format!("Name is not normalized: {}", s)));
        }
        Ok(name)
    }

    /// Whether `s` is a 12-character account name a user may register
    pub fn is_valid_account(s: &str) -> bool {
        s.len() == ACCOUNT_NAME_LEN
            && s.bytes().all(|c| ACCOUNT_CHARS.contains(&c))
            && Name::new(s).is_ok()
    }

    /// Random 12-character account name
    pub fn random_account<R: Rng + ?Sized>(rng: &mut R) -> String {
        (0..ACCOUNT_NAME_LEN)
            .map(|_| ACCOUNT_CHARS[rng.gen_range(0..ACCOUNT_CHARS.len())] as char)
            .collect()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; 13];
        let mut tmp = self.0;

        for i in 0..=12 {
            let idx = if i == 0 { tmp & 0x0f } else { tmp & 0x1f };
            out[12 - i] = CHARMAP[idx as usize];
            tmp >>= if i == 0 { 4 } else { 5 };
        }

        let s = std::str::from_utf8(&out).map_err(|_| fmt::Error)?;
        f.write_str(s.trim_end_matches('.'))
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Name::new(s)
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Name::new(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(Name::new("eosio").unwrap().as_u64(), 6138663577826885632);
        assert_eq!(Name::new("eosio.token").unwrap().as_u64(), 6138663591592764928);
        assert_eq!(Name::from_raw(6138663577826885632).to_string(), "eosio");
        assert_eq!(Name::from_static("eosio.token"), Name::new("eosio.token").unwrap());
        assert_eq!(Name::from_static("buyrambytes"), Name::new("buyrambytes").unwrap());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["transfer", "buyrambytes", "newaccount", "alice", "signupeoseos"] {
            assert_eq!(Name::new(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(Name::new("").is_err());
        assert!(Name::new("Alice").is_err());
        assert!(Name::new("alice6").is_err());
        assert!(Name::new("abcdefghijklmn").is_err());
    }

    #[test]
    fn test_account_validation() {
        assert!(Name::is_valid_account("abcdefgh1234"));
        assert!(!Name::is_valid_account("short"));
        assert!(!Name::is_valid_account("abcdefgh123."));
        assert!(!Name::is_valid_account("abcdefgh1236"));
    }

    #[test]
    fn test_random_account_is_valid() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let name = Name::random_account(&mut rng);
            assert!(Name::is_valid_account(&name), "{}", name);
        }
    }
}
