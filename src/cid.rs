//! Content identifiers
//!
//! Identifiers are version-0 CIDs: a sha2-256 multihash (`0x12 0x20` prefix
//! followed by the 32-byte digest) rendered in base58btc, so every identifier
//! prints as a 46-character string starting with `Qm`.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Multihash code for sha2-256
const SHA2_256_CODE: u8 = 0x12;
/// Digest length for sha2-256
const SHA2_256_LEN: u8 = 32;
/// Encoded multihash length: code + length + digest
const MULTIHASH_LEN: usize = 2 + SHA2_256_LEN as usize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    multihash: [u8; MULTIHASH_LEN],
}

impl ContentId {
    /// Hash `data` with sha2-256 and wrap the digest as a CIDv0
    pub fn from_data(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut multihash = [0u8; MULTIHASH_LEN];
        multihash[0] = SHA2_256_CODE;
        multihash[1] = SHA2_256_LEN;
        multihash[2..].copy_from_slice(&digest);
        Self { multihash }
    }

    /// Raw multihash bytes
    pub fn to_bytes(&self) -> &[u8] {
        &self.multihash
    }

    /// The sha2-256 digest without the multihash prefix
    pub fn digest(&self) -> &[u8] {
        &self.multihash[2..]
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(&self.multihash).into_string())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self)
    }
}

impl FromStr for ContentId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s)
            .into_vec()
            .with_context(|| format!("invalid base58 in content id '{}'", s))?;
        if bytes.len() != MULTIHASH_LEN {
            bail!(
                "content id '{}' decodes to {} bytes, expected {}",
                s,
                bytes.len(),
                MULTIHASH_LEN
            );
        }
        if bytes[0] != SHA2_256_CODE || bytes[1] != SHA2_256_LEN {
            bail!(
                "content id '{}' is not a sha2-256 multihash (code=0x{:02x}, len={})",
                s,
                bytes[0],
                bytes[1]
            );
        }
        let mut multihash = [0u8; MULTIHASH_LEN];
        multihash.copy_from_slice(&bytes);
        Ok(Self { multihash })
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
