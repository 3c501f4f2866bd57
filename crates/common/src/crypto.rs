//! WireGuard key management
//!
//! Keys are 32 bytes and travel as standard padded base64 (44 characters),
//! the same text form `wg genkey` / `wg pubkey` use. Private keys are clamped
//! X25519 static secrets; public keys are derived with `x25519-dalek`.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use x25519_dalek::{PublicKey as DalekPublicKey, StaticSecret};

/// Raw key length in bytes
pub const KEY_LEN: usize = 32;

fn decode_key(s: &str, what: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = STANDARD
        .decode(s.trim())
        .map_err(|e| Error::KeyParse(format!("{} is not valid base64: {}", what, e)))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        Error::KeyParse(format!(
            "{} must be {} bytes, got {}",
            what,
            KEY_LEN,
            v.len()
        ))
    })
}

macro_rules! key_serde {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&STANDARD.encode(self.0))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Public half of a WireGuard key pair
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_key(s, "public key").map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

key_serde!(PublicKey);

/// Secret key material: a private key or a preshared key.
///
/// `Debug` never prints the key; `Display` does, for rendering configs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    /// Fresh clamped X25519 private key
    pub fn generate_private() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);

        // WireGuard key clamping
        bytes[0] &= 248;
        bytes[31] &= 127;
        bytes[31] |= 64;

        Self(bytes)
    }

    /// 32 random bytes, used as a preshared key
    pub fn generate_preshared() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Derive the public key, treating this as an X25519 private key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.0);
        PublicKey(DalekPublicKey::from(&secret).to_bytes())
    }
}

impl FromStr for SecretKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode_key(s, "key").map(Self)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

key_serde!(SecretKey);

/// X25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let private_key = SecretKey::generate_private();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

pub fn generate_preshared_key() -> SecretKey {
    SecretKey::generate_preshared()
}

pub fn parse_public_key(s: &str) -> Result<PublicKey> {
    s.parse()
}

pub fn parse_preshared_key(s: &str) -> Result<SecretKey> {
    decode_key(s, "preshared key").map(SecretKey)
}
