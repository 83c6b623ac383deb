//! Internal trust secret shared by cooperating processes
//!
//! Registration calls between processes on the same host authenticate with a
//! single shared secret. Whichever process needs it first generates and
//! persists it; every later process reads the same value. The secret is
//! loaded once at startup and read-only for the process lifetime.

use crate::{Error, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

// Fixed HMAC key: the Mac is used only as a constant-time comparator
const COMPARE_KEY: &[u8] = b"docgate-internal-trust-v1";

/// Shared secret authenticating internal registration calls
#[derive(Clone)]
pub struct InternalTrust {
    secret: String,
}

impl InternalTrust {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(Error::Config("Internal trust secret cannot be empty".to_string()));
        }
        Ok(Self { secret })
    }

    /// Read the secret file, generating and persisting it on first use
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if let Some(existing) = read_secret_file(path)? {
            tracing::debug!(path = %path.display(), "loaded internal trust secret");
            return Self::new(existing);
        }

        let secret = generate_secret();
        write_secret_file(path, &secret)?;
        tracing::info!(path = %path.display(), "generated new internal trust secret");
        Self::new(secret)
    }

    /// Constant-time check of a presented secret
    ///
    /// A wrong secret and a missing secret are indistinguishable to the
    /// caller; both yield a uniform rejection.
    pub fn verify(&self, presented: &str) -> bool {
        let expected = match hmac_tag(self.secret.as_bytes()) {
            Ok(tag) => tag,
            Err(_) => return false,
        };
        let mut mac = match HmacSha256::new_from_slice(COMPARE_KEY) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(presented.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// The raw secret, for attaching to outbound registration calls
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

fn hmac_tag(data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(COMPARE_KEY)
        .map_err(|e| Error::Crypto(format!("Invalid comparator key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Generate a fresh secret: 32 bytes of CSPRNG output, base64-encoded
pub fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Read the sealed-token codec key, generating and persisting it on first use
///
/// Same bootstrap discipline as the trust secret: one coordinator generates,
/// everyone else reads.
pub fn load_or_generate_codec_key(path: &Path) -> Result<String> {
    if let Some(existing) = read_secret_file(path)? {
        return Ok(existing);
    }
    let key = crate::token::SealedCodec::generate_key();
    write_secret_file(path, &key)?;
    tracing::info!(path = %path.display(), "generated new sealed-token codec key");
    Ok(key)
}

fn read_secret_file(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(trimmed.to_string()))
}

fn write_secret_file(path: &Path, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, value)?;

    // Owner-only permissions; at-rest encryption is a host concern
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
