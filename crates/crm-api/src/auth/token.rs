//! Opaque bearer secrets
//!
//! Session, refresh and invitation tokens are 256 random bits encoded as
//! unpadded base64url. They carry no claims. The store only ever sees the
//! SHA-256 of a token, so a leaked table cannot be replayed.

use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Random bytes per token
pub const TOKEN_BYTES: usize = 32;

/// Encoded length of a token (32 bytes, base64url without padding)
pub const TOKEN_LEN: usize = 43;

/// Generate a fresh token from the OS CSPRNG
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token for storage and lookup (hex SHA-256)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Cheap shape check run before any store lookup
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Session token, refresh token and their hashes, minted together
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub session_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn generate() -> Self {
        Self {
            session_token: generate_token(),
            refresh_token: generate_token(),
        }
    }

    pub fn session_hash(&self) -> String {
        hash_token(&self.session_token)
    }

    pub fn refresh_hash(&self) -> String {
        hash_token(&self.refresh_token)
    }
}
