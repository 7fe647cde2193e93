// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Operator sessions and the stored admin credential.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "hmac-sha256";
const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid username or password")]
    AuthError,

    #[error("Missing, unknown or revoked session token")]
    Unauthenticated,

    #[error("Malformed password hash: {0}")]
    InvalidHash(String),
}

/// 256-bit random bearer token, hex encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of Debug output and logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: SessionToken,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub remote_address: Option<SocketAddr>,
}

/// `hmac-sha256$<salt-hex>$<mac-hex>` where mac = HMAC-SHA256(key = salt, password).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordHash {
    salt: Vec<u8>,
    mac: Vec<u8>,
}

impl PasswordHash {
    pub fn parse(encoded: &str) -> Result<Self, SessionError> {
        let mut parts = encoded.split('$');
        let (Some(scheme), Some(salt), Some(mac), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SessionError::InvalidHash(
                "expected hmac-sha256$<salt-hex>$<mac-hex>".to_string(),
            ));
        };

        if scheme != HASH_SCHEME {
            return Err(SessionError::InvalidHash(format!("unsupported scheme '{}'", scheme)));
        }

        let salt = hex::decode(salt).map_err(|e| SessionError::InvalidHash(format!("salt: {}", e)))?;
        let mac = hex::decode(mac).map_err(|e| SessionError::InvalidHash(format!("mac: {}", e)))?;
        if salt.is_empty() || mac.len() != 32 {
            return Err(SessionError::InvalidHash("salt is empty or mac is not 32 bytes".to_string()));
        }

        Ok(Self { salt, mac })
    }

    /// Hash a password with a fresh random salt.
    pub fn derive(password: &str) -> Self {
        let mut salt = vec![0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let mac = compute_mac(&salt, password);
        Self { salt, mac }
    }

    /// Constant-time check of `password` against the stored MAC.
    pub fn verify(&self, password: &str) -> bool {
        let candidate = compute_mac(&self.salt, password);
        candidate.ct_eq(&self.mac).into()
    }
}

impl fmt::Display for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}${}", HASH_SCHEME, hex::encode(&self.salt), hex::encode(&self.mac))
    }
}

fn compute_mac(salt: &[u8], password: &str) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(salt) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(password.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_then_verify() {
        let hash = PasswordHash::derive("correct horse");
        assert!(hash.verify("correct horse"));
        assert!(!hash.verify("correct horse "));

        let reparsed = PasswordHash::parse(&hash.to_string()).unwrap();
        assert_eq!(reparsed, hash);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(PasswordHash::parse("hunter2").is_err());
        assert!(PasswordHash::parse("md5$00$00").is_err());
        assert!(PasswordHash::parse("hmac-sha256$zz$00").is_err());
        assert!(PasswordHash::parse("hmac-sha256$0011$0011").is_err());
        assert!(PasswordHash::parse("hmac-sha256$00$00$00").is_err());
    }

    #[test]
    fn test_tokens_are_unique_and_256_bit() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(format!("{:?}", a), "SessionToken(..)");
    }
}
