// src/spec/hash.rs

//! Content hashes identifying concrete specs
//!
//! A spec hash is the SHA-256 of the canonical JSON form of a node
//! (see [`super::node::NodeDict`]), truncated to 32 lowercase hex
//! characters. Because each node's canonical form embeds the hashes of
//! its dependencies, the hash of a root identifies its whole DAG.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of hex characters kept from the digest
pub const HASH_LEN: usize = 32;

/// Number of characters shown in abbreviated output
pub const SHORT_LEN: usize = 7;

/// Hash parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Hash string has the wrong length
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains characters other than lowercase hex
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid spec hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in spec hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

impl From<HashError> for crate::Error {
    fn from(err: HashError) -> Self {
        crate::Error::ParseError(err.to_string())
    }
}

/// Identity of a concrete spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash canonical bytes
    pub fn of(canonical: &[u8]) -> Self {
        let digest = Sha256::digest(canonical);
        let mut hex = hex::encode(digest);
        hex.truncate(HASH_LEN);
        Self(hex)
    }

    /// Validate an existing hash string
    pub fn new(value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        if value.len() != HASH_LEN {
            return Err(HashError::InvalidLength {
                expected: HASH_LEN,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)) {
            return Err(HashError::InvalidHex(value));
        }
        Ok(Self(value))
    }

    /// Get the hash as a hex string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for listings
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }

    /// True if `prefix` abbreviates this hash
    pub fn starts_with(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.0.starts_with(prefix)
    }
}

impl fmt::Display for SpecHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SpecHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for SpecHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for SpecHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SpecHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SpecHash::new(s).map_err(serde::de::Error::custom)
    }
}
