//! Configuration management for the document proxy
//!
//! All settings load from `DOCGATE_`-prefixed environment variables, with
//! explicit validation before use.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Deployment topology, selected once at startup and immutable thereafter
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Per-process proxy: in-memory store, session-lifetime links
    Standalone,
    /// Shared persistent proxy: SQLite store, long-lived sealed links
    Shared,
}

impl Default for ProxyMode {
    fn default() -> Self {
        Self::Standalone
    }
}

/// Proxy server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Bind address for the HTTP server
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Deployment mode
    #[serde(default)]
    pub mode: ProxyMode,

    /// Base URL embedded in minted links (defaults to http://localhost:<port>)
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Port of an externally managed shared proxy; "none" skips detection
    #[serde(default)]
    pub shared_proxy_port: Option<String>,

    /// Path of the internal trust secret file
    #[serde(default)]
    pub secret_path: Option<PathBuf>,

    /// Path of the sealed-token codec key file (shared mode)
    #[serde(default)]
    pub codec_key_path: Option<PathBuf>,

    /// Path of the SQLite link database (shared mode)
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Upstream credentials as "ref:key" entries
    #[serde(default)]
    pub credentials: Vec<String>,

    /// Upstream fetch timeout in seconds
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Link TTL for standalone mode, in seconds
    #[serde(default = "default_standalone_ttl_secs")]
    pub standalone_ttl_secs: u64,

    /// Link TTL for shared mode, in seconds
    #[serde(default = "default_shared_ttl_secs")]
    pub shared_ttl_secs: u64,

    /// Shared-proxy probe timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl ProxyConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config: Self = envy::prefixed("DOCGATE_")
            .from_env()
            .map_err(|e| Error::Config(format!("Failed to parse environment variables: {}", e)))?;

        // Handle comma-separated DOCGATE_CREDENTIALS if provided as single string
        if config.credentials.is_empty() {
            if let Ok(creds) = std::env::var("DOCGATE_CREDENTIALS") {
                config.credentials = creds
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }

        // Single-key shorthand used by most installations
        if config.credentials.is_empty() {
            if let Ok(key) = std::env::var("DOCGATE_UPSTREAM_KEY") {
                if !key.trim().is_empty() {
                    config.credentials = vec![format!("primary:{}", key.trim())];
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| Error::Config(format!("Invalid listen_address: {}", e)))?;

        if let Some(base) = &self.public_base_url {
            Url::parse(base)
                .map_err(|e| Error::Config(format!("Invalid public_base_url: {}", e)))?;
        }

        if self.credentials.is_empty() {
            return Err(Error::Config(
                "At least one upstream credential required via DOCGATE_CREDENTIALS or DOCGATE_UPSTREAM_KEY"
                    .to_string(),
            ));
        }

        for entry in &self.credentials {
            if !entry.contains(':') {
                return Err(Error::Config(format!(
                    "Invalid credential entry '{}': expected ref:key",
                    entry
                )));
            }
        }

        if self.standalone_ttl_secs == 0 || self.shared_ttl_secs == 0 {
            return Err(Error::Config("Link TTLs must be > 0".to_string()));
        }

        if self.upstream_timeout_secs == 0 {
            return Err(Error::Config("upstream_timeout_secs must be > 0".to_string()));
        }

        Ok(())
    }

    /// Parsed shared-proxy port; `None` when unset or the "none" sentinel
    pub fn shared_proxy_port(&self) -> Option<u16> {
        let raw = self.shared_proxy_port.as_deref()?.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return None;
        }
        raw.parse().ok()
    }

    /// Base URL to embed in minted public links
    pub fn public_base_url(&self) -> String {
        if let Some(base) = &self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        let port = self
            .listen_address
            .parse::<std::net::SocketAddr>()
            .map(|a| a.port())
            .unwrap_or(8081);
        format!("http://localhost:{}", port)
    }

    /// Default link TTL for the configured mode
    pub fn default_ttl(&self) -> Duration {
        match self.mode {
            ProxyMode::Standalone => Duration::from_secs(self.standalone_ttl_secs),
            ProxyMode::Shared => Duration::from_secs(self.shared_ttl_secs),
        }
    }

    /// Clamp a caller-requested TTL to the configured ceiling
    pub fn clamp_ttl(&self, requested_secs: Option<u64>) -> Duration {
        let ceiling = self.default_ttl().as_secs();
        match requested_secs {
            Some(secs) if secs >= 1 => Duration::from_secs(secs.min(ceiling)),
            _ => Duration::from_secs(ceiling),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Path of the internal trust secret file
    pub fn secret_path(&self) -> PathBuf {
        self.secret_path
            .clone()
            .unwrap_or_else(|| state_dir().join("internal_trust_secret"))
    }

    /// Path of the sealed-token codec key file
    pub fn codec_key_path(&self) -> PathBuf {
        self.codec_key_path
            .clone()
            .unwrap_or_else(|| state_dir().join("codec.key"))
    }

    /// Path of the SQLite link database
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| state_dir().join("links.db"))
    }
}

/// Per-host state directory shared by cooperating processes
fn state_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".docgate")
}

/// Named upstream credentials, resolved by reference at fetch time
///
/// Links never carry the raw credential, only a reference into this vault.
#[derive(Debug, Clone, Default)]
pub struct CredentialVault {
    keys: HashMap<String, String>,
}

impl CredentialVault {
    /// Build a vault from "ref:key" entries
    pub fn from_entries(entries: &[String]) -> Result<Self> {
        let mut keys = HashMap::new();
        for entry in entries {
            let (name, key) = entry
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("Invalid credential entry '{}'", entry)))?;
            if name.is_empty() || key.is_empty() {
                return Err(Error::Config(format!("Invalid credential entry '{}'", entry)));
            }
            keys.insert(name.to_string(), key.to_string());
        }
        Ok(Self { keys })
    }

    /// Resolve a credential reference to the raw key
    pub fn resolve(&self, credential_ref: &str) -> Option<&str> {
        self.keys.get(credential_ref).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// Default value functions
fn default_listen_address() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    60
}

fn default_standalone_ttl_secs() -> u64 {
    crate::DEFAULT_STANDALONE_TTL_SECS
}

fn default_shared_ttl_secs() -> u64 {
    crate::DEFAULT_SHARED_TTL_SECS
}

fn default_probe_timeout_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ProxyConfig {
        ProxyConfig {
            listen_address: "127.0.0.1:8081".to_string(),
            mode: ProxyMode::Standalone,
            public_base_url: None,
            shared_proxy_port: None,
            secret_path: None,
            codec_key_path: None,
            db_path: None,
            credentials: vec!["primary:test-key".to_string()],
            upstream_timeout_secs: 60,
            standalone_ttl_secs: 3_600,
            shared_ttl_secs: 604_800,
            probe_timeout_ms: 500,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(base_config().validate().is_ok());

        let mut bad = base_config();
        bad.listen_address = "not-an-address".to_string();
        assert!(bad.validate().is_err());

        let mut no_creds = base_config();
        no_creds.credentials.clear();
        assert!(no_creds.validate().is_err());
    }

    #[test]
    fn test_shared_proxy_port_sentinel() {
        let mut config = base_config();
        assert_eq!(config.shared_proxy_port(), None);

        config.shared_proxy_port = Some("none".to_string());
        assert_eq!(config.shared_proxy_port(), None);

        config.shared_proxy_port = Some("NONE".to_string());
        assert_eq!(config.shared_proxy_port(), None);

        config.shared_proxy_port = Some("8080".to_string());
        assert_eq!(config.shared_proxy_port(), Some(8080));

        config.shared_proxy_port = Some("not-a-port".to_string());
        assert_eq!(config.shared_proxy_port(), None);
    }

    #[test]
    fn test_public_base_url_defaults_to_listen_port() {
        let config = base_config();
        assert_eq!(config.public_base_url(), "http://localhost:8081");

        let mut custom = base_config();
        custom.public_base_url = Some("https://docs.example.com/".to_string());
        assert_eq!(custom.public_base_url(), "https://docs.example.com");
    }

    #[test]
    fn test_ttl_clamping() {
        let config = base_config();
        assert_eq!(config.clamp_ttl(None).as_secs(), 3_600);
        assert_eq!(config.clamp_ttl(Some(60)).as_secs(), 60);
        assert_eq!(config.clamp_ttl(Some(999_999_999)).as_secs(), 3_600);
        assert_eq!(config.clamp_ttl(Some(0)).as_secs(), 3_600);
    }

    #[test]
    fn test_credential_vault() {
        let vault = CredentialVault::from_entries(&[
            "primary:key-one".to_string(),
            "archive:key-two".to_string(),
        ])
        .unwrap();
        assert_eq!(vault.resolve("primary"), Some("key-one"));
        assert_eq!(vault.resolve("archive"), Some("key-two"));
        assert_eq!(vault.resolve("missing"), None);

        assert!(CredentialVault::from_entries(&["malformed".to_string()]).is_err());
    }
}
