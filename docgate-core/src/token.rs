//! Link token minting and verification
//!
//! Two codecs back the two deployment topologies. Standalone proxies mint
//! random 256-bit lookup keys: unguessable, meaningful only to the local
//! store. The shared proxy seals claims into a Fernet token (AES-128-CBC +
//! HMAC-SHA256), so a restarted or cooperating process can verify a token's
//! authenticity and expiry without a store lookup. Neither form ever carries
//! the upstream credential.

use crate::{Error, Result};
use base64::Engine;
use chrono::{DateTime, Utc};
use fernet::Fernet;
use serde::{Deserialize, Serialize};

/// Claims sealed inside a shared-mode token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkClaims {
    /// Internal document identifier (never exposed in the URL)
    pub document_id: String,
    /// Hard expiry of the link
    pub expires_at: DateTime<Utc>,
}

impl LinkClaims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Mint a random lookup-key token: 32 bytes of CSPRNG output, URL-safe base64
pub fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Authenticated-encryption codec for shared-mode tokens
pub struct SealedCodec {
    fernet: Fernet,
}

impl SealedCodec {
    /// Build a codec from a URL-safe base64 key (32 bytes decoded)
    pub fn new(key: &str) -> Result<Self> {
        let fernet = Fernet::new(key.trim())
            .ok_or_else(|| Error::Crypto("Invalid codec key".to_string()))?;
        Ok(Self { fernet })
    }

    /// Generate a fresh codec key
    pub fn generate_key() -> String {
        Fernet::generate_key()
    }

    /// Seal claims into an opaque token
    pub fn seal(&self, claims: &LinkClaims) -> Result<String> {
        let plain = serde_json::to_vec(claims)?;
        Ok(self.fernet.encrypt(&plain))
    }

    /// Open a token, verifying its MAC
    ///
    /// A token that fails authentication is indistinguishable from one that
    /// never existed, so this maps straight to `LinkNotFound`. Expiry is the
    /// caller's check, because an authentic-but-expired token changes the
    /// user guidance.
    pub fn open(&self, token: &str) -> Result<LinkClaims> {
        let plain = self.fernet.decrypt(token).map_err(|_| Error::LinkNotFound)?;
        serde_json::from_slice(&plain).map_err(|_| Error::LinkNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_random_tokens_are_unique_and_opaque() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        // 32 bytes, unpadded URL-safe base64
        assert_eq!(a.len(), 43);
        assert!(!a.contains('/') && !a.contains('+'));
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let codec = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        let claims = LinkClaims {
            document_id: "doc-8839".to_string(),
            expires_at: Utc::now() + Duration::days(7),
        };

        let token = codec.seal(&claims).unwrap();
        let opened = codec.open(&token).unwrap();
        assert_eq!(opened, claims);
        assert!(!opened.is_expired(Utc::now()));
    }

    #[test]
    fn test_token_never_reveals_document_id() {
        let codec = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        let claims = LinkClaims {
            document_id: "SENSITIVE-DOCUMENT-ID".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let token = codec.seal(&claims).unwrap();
        assert!(!token.contains("SENSITIVE"));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let codec = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        let claims = LinkClaims {
            document_id: "doc-1".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let token = codec.seal(&claims).unwrap();

        let mut tampered: Vec<char> = token.chars().collect();
        let mid = tampered.len() / 2;
        tampered[mid] = if tampered[mid] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();

        assert!(matches!(codec.open(&tampered), Err(Error::LinkNotFound)));
    }

    #[test]
    fn test_foreign_key_cannot_open_token() {
        let codec_a = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        let codec_b = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        let claims = LinkClaims {
            document_id: "doc-2".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        let token = codec_a.seal(&claims).unwrap();
        assert!(matches!(codec_b.open(&token), Err(Error::LinkNotFound)));
    }

    #[test]
    fn test_random_garbage_rejected() {
        let codec = SealedCodec::new(&SealedCodec::generate_key()).unwrap();
        assert!(matches!(codec.open(&random_token()), Err(Error::LinkNotFound)));
        assert!(matches!(codec.open("not-a-token"), Err(Error::LinkNotFound)));
    }

    #[test]
    fn test_expired_claims_detected() {
        let claims = LinkClaims {
            document_id: "doc-3".to_string(),
            expires_at: Utc::now() - Duration::seconds(1),
        };
        assert!(claims.is_expired(Utc::now()));
    }
}
