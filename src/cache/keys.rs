//! Cache key derivation.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// How a request maps to a backing-store key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// `path?query`, unnormalized.
    #[default]
    Identity,
    /// Hex SHA-256 of the identity key.
    Sha256,
}

impl FromStr for KeyStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(Self::Identity),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown key strategy `{other}`")),
        }
    }
}

/// Backing-store key for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// `path + "?" + query`; a missing query is treated as empty.
    pub fn identity(path: &str, query: Option<&str>) -> Self {
        Self(format!("{path}?{}", query.unwrap_or("")))
    }

    pub fn sha256(path: &str, query: Option<&str>) -> Self {
        let identity = Self::identity(path, query);
        let digest = Sha256::digest(identity.0.as_bytes());
        Self(hex::encode(digest.as_slice()))
    }

    pub fn derive(strategy: KeyStrategy, path: &str, query: Option<&str>) -> Self {
        match strategy {
            KeyStrategy::Identity => Self::identity(path, query),
            KeyStrategy::Sha256 => Self::sha256(path, query),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
