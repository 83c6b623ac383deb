//! Link issuance strategies
//!
//! A process that wants to mint download links either owns a proxy (local
//! issuance straight into the store) or defers to the shared proxy already
//! running on the host (remote issuance over the internal registration
//! surface). The topology is decided once at startup, not branched on per
//! call.

use crate::config::ProxyConfig;
use crate::store::{DownloadLink, LinkStore};
use crate::token::{random_token, LinkClaims, SealedCodec};
use crate::trust::InternalTrust;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Header carrying the internal trust secret on registration calls
pub const TRUST_HEADER: &str = "x-internal-auth";

/// Registration payload (internal wire format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Internal document identifier at the upstream
    pub document_id: String,
    /// Exact upstream URL serving the document bytes
    pub upstream_url: String,
    /// Vault reference of the credential to use on fetch
    #[serde(default = "default_credential_ref")]
    pub credential_ref: String,
    /// Suggested download filename
    pub filename: String,
    /// Requested lifetime; clamped to the proxy's ceiling
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

fn default_credential_ref() -> String {
    "primary".to_string()
}

/// Minted link returned to the registering process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedLink {
    pub token: String,
    pub public_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Make a caller-supplied filename safe for a Content-Disposition header
///
/// Keeps ASCII alphanumerics, dot, underscore, and hyphen; everything else
/// becomes an underscore. Falls back to a generic name rather than erroring.
pub fn sanitize_filename(raw: &str) -> String {
    let mut cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // All-ASCII by construction, so byte truncation is safe
    cleaned.truncate(120);
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.');

    if cleaned.is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Strategy for minting download links
#[async_trait]
pub trait LinkIssuer: Send + Sync {
    async fn issue(&self, request: RegistrationRequest) -> Result<IssuedLink>;
}

/// Issues links straight into a co-located store
pub struct LocalLinkIssuer {
    store: Arc<dyn LinkStore>,
    /// Sealed-token codec; `None` mints random lookup keys instead
    codec: Option<Arc<SealedCodec>>,
    base_url: String,
    ttl_ceiling: Duration,
}

impl LocalLinkIssuer {
    pub fn new(
        store: Arc<dyn LinkStore>,
        codec: Option<Arc<SealedCodec>>,
        base_url: String,
        ttl_ceiling: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            base_url: base_url.trim_end_matches('/').to_string(),
            ttl_ceiling,
        }
    }

    fn clamp_ttl(&self, requested_secs: Option<u64>) -> Duration {
        let ceiling = self.ttl_ceiling.as_secs();
        match requested_secs {
            Some(secs) if secs >= 1 => Duration::from_secs(secs.min(ceiling)),
            _ => Duration::from_secs(ceiling),
        }
    }
}

#[async_trait]
impl LinkIssuer for LocalLinkIssuer {
    async fn issue(&self, request: RegistrationRequest) -> Result<IssuedLink> {
        if request.document_id.trim().is_empty() {
            return Err(Error::Validation("document_id cannot be empty".to_string()));
        }
        let upstream_url = Url::parse(&request.upstream_url)
            .map_err(|e| Error::Validation(format!("Invalid upstream_url: {}", e)))?;

        let ttl = self.clamp_ttl(request.ttl_secs);
        let created_at = Utc::now();
        let expires_at = created_at + chrono::Duration::seconds(ttl.as_secs().max(1) as i64);

        let token = match &self.codec {
            Some(codec) => codec.seal(&LinkClaims {
                document_id: request.document_id.clone(),
                expires_at,
            })?,
            None => random_token(),
        };

        let link = DownloadLink {
            token: token.clone(),
            document_id: request.document_id,
            upstream_url,
            credential_ref: request.credential_ref,
            filename: sanitize_filename(&request.filename),
            created_at,
            expires_at,
            consumption_count: 0,
        };
        self.store.insert(&link)?;

        debug!(expires_at = %expires_at, "minted download link");

        Ok(IssuedLink {
            public_url: format!("{}/download/{}", self.base_url, token),
            token,
            expires_at,
        })
    }
}

/// Forwards registrations to the shared proxy on this host
pub struct RemoteLinkIssuer {
    client: reqwest::Client,
    endpoint: Url,
    trust: InternalTrust,
}

impl RemoteLinkIssuer {
    pub fn new(base: Url, trust: InternalTrust, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::Network)?;
        let endpoint = base
            .join("/links")
            .map_err(|e| Error::Config(format!("Invalid shared proxy URL: {}", e)))?;
        Ok(Self { client, endpoint, trust })
    }

    /// Issuer pointed at the well-known local port of the shared proxy
    pub fn for_port(port: u16, trust: InternalTrust, timeout: Duration) -> Result<Self> {
        let base = Url::parse(&format!("http://127.0.0.1:{}/", port))
            .map_err(|e| Error::Config(format!("Invalid shared proxy port: {}", e)))?;
        Self::new(base, trust, timeout)
    }
}

#[async_trait]
impl LinkIssuer for RemoteLinkIssuer {
    async fn issue(&self, request: RegistrationRequest) -> Result<IssuedLink> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(TRUST_HEADER, self.trust.expose())
            .json(&request)
            .send()
            .await
            .map_err(Error::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication);
        }
        if !status.is_success() {
            return Err(Error::Internal(format!(
                "Shared proxy registration failed: HTTP {}",
                status
            )));
        }

        let issued: IssuedLink = response.json().await.map_err(Error::Network)?;
        Ok(issued)
    }
}

/// Topology decided at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerSelection {
    /// A shared proxy answered the probe; register through it
    UseShared(u16),
    /// Run standalone with a local in-memory proxy
    Standalone,
}

/// Probe a local port for a running shared proxy
pub async fn probe_shared_proxy(port: u16, timeout: Duration) -> bool {
    let url = format!("http://127.0.0.1:{}/", port);
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    match client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}

/// Decide the deployment topology exactly once at startup
///
/// An explicit "none" (or absent) shared-proxy setting skips detection so
/// standalone startup stays fast; otherwise one short-timeout probe decides.
pub async fn detect_topology(config: &ProxyConfig) -> IssuerSelection {
    match config.shared_proxy_port() {
        None => {
            debug!("no shared proxy configured, starting standalone");
            IssuerSelection::Standalone
        }
        Some(port) => {
            if probe_shared_proxy(port, config.probe_timeout()).await {
                info!(port, "shared proxy detected, deferring registrations");
                IssuerSelection::UseShared(port)
            } else {
                info!(port, "shared proxy did not answer, falling back to standalone");
                IssuerSelection::Standalone
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Resolution};

    fn sample_request() -> RegistrationRequest {
        RegistrationRequest {
            document_id: "doc-42".to_string(),
            upstream_url: "https://upstream.example/documents/doc-42/download".to_string(),
            credential_ref: "primary".to_string(),
            filename: "petition decision (final).pdf".to_string(),
            ttl_secs: Some(600),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(
            sanitize_filename("petition decision (final).pdf"),
            "petition_decision__final_.pdf"
        );
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename(""), "document.pdf");
        assert_eq!(sanitize_filename("___"), "document.pdf");
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");

        let long = "x".repeat(400);
        assert!(sanitize_filename(&long).len() <= 120);
    }

    #[tokio::test]
    async fn test_local_issuer_random_tokens() {
        let store = Arc::new(MemoryStore::new());
        let issuer = LocalLinkIssuer::new(
            store.clone(),
            None,
            "http://localhost:8081".to_string(),
            Duration::from_secs(3_600),
        );

        let issued = issuer.issue(sample_request()).await.unwrap();
        assert!(issued.public_url.starts_with("http://localhost:8081/download/"));
        assert_eq!(issued.token.len(), 43);

        match store.resolve(&issued.token).unwrap() {
            Resolution::Found(link) => {
                assert_eq!(link.document_id, "doc-42");
                assert_eq!(link.filename, "petition_decision__final_.pdf");
            }
            other => panic!("expected Found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_issuer_sealed_tokens_verify_offline() {
        let codec = Arc::new(SealedCodec::new(&SealedCodec::generate_key()).unwrap());
        let store = Arc::new(MemoryStore::new());
        let issuer = LocalLinkIssuer::new(
            store,
            Some(codec.clone()),
            "http://localhost:8081".to_string(),
            Duration::from_secs(604_800),
        );

        let issued = issuer.issue(sample_request()).await.unwrap();

        // The sealed token carries its own verifiable claims
        let claims = codec.open(&issued.token).unwrap();
        assert_eq!(claims.document_id, "doc-42");
        assert_eq!(claims.expires_at, issued.expires_at);
    }

    #[tokio::test]
    async fn test_local_issuer_clamps_ttl() {
        let store = Arc::new(MemoryStore::new());
        let issuer = LocalLinkIssuer::new(
            store,
            None,
            "http://localhost:8081".to_string(),
            Duration::from_secs(3_600),
        );

        let mut request = sample_request();
        request.ttl_secs = Some(999_999_999);
        let issued = issuer.issue(request).await.unwrap();

        let lifetime = issued.expires_at - Utc::now();
        assert!(lifetime <= chrono::Duration::seconds(3_601));
    }

    #[tokio::test]
    async fn test_local_issuer_rejects_bad_input() {
        let store = Arc::new(MemoryStore::new());
        let issuer = LocalLinkIssuer::new(
            store,
            None,
            "http://localhost:8081".to_string(),
            Duration::from_secs(3_600),
        );

        let mut empty_doc = sample_request();
        empty_doc.document_id = "  ".to_string();
        assert!(matches!(
            issuer.issue(empty_doc).await,
            Err(Error::Validation(_))
        ));

        let mut bad_url = sample_request();
        bad_url.upstream_url = "not a url".to_string();
        assert!(matches!(
            issuer.issue(bad_url).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remote_issuer_forwards_with_trust_header() {
        let mut server = mockito::Server::new_async().await;
        let issued = IssuedLink {
            token: "tok".to_string(),
            public_url: "http://localhost:8080/download/tok".to_string(),
            expires_at: Utc::now() + chrono::Duration::days(7),
        };
        let mock = server
            .mock("POST", "/links")
            .match_header(TRUST_HEADER, "s3cret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(&issued).unwrap())
            .create_async()
            .await;

        let trust = InternalTrust::new("s3cret").unwrap();
        let issuer = RemoteLinkIssuer::new(
            Url::parse(&server.url()).unwrap(),
            trust,
            Duration::from_secs(5),
        )
        .unwrap();

        let result = issuer.issue(sample_request()).await.unwrap();
        assert_eq!(result.token, "tok");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_issuer_maps_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/links")
            .with_status(401)
            .create_async()
            .await;

        let trust = InternalTrust::new("wrong").unwrap();
        let issuer = RemoteLinkIssuer::new(
            Url::parse(&server.url()).unwrap(),
            trust,
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(matches!(
            issuer.issue(sample_request()).await,
            Err(Error::Authentication)
        ));
    }

    #[tokio::test]
    async fn test_topology_detection() {
        let mut config = crate::config::ProxyConfig {
            listen_address: "127.0.0.1:8081".to_string(),
            mode: crate::config::ProxyMode::Standalone,
            public_base_url: None,
            shared_proxy_port: Some("none".to_string()),
            secret_path: None,
            codec_key_path: None,
            db_path: None,
            credentials: vec!["primary:k".to_string()],
            upstream_timeout_secs: 60,
            standalone_ttl_secs: 3_600,
            shared_ttl_secs: 604_800,
            probe_timeout_ms: 200,
        };

        // Explicit sentinel skips detection
        assert_eq!(detect_topology(&config).await, IssuerSelection::Standalone);

        // Nothing listening: probe fails, fall back to standalone
        config.shared_proxy_port = Some("1".to_string());
        assert_eq!(detect_topology(&config).await, IssuerSelection::Standalone);

        // A live shared proxy answers the probe
        let mut server = mockito::Server::new_async().await;
        let _health = server
            .mock("GET", "/")
            .with_status(200)
            .with_body("{\"status\":\"healthy\"}")
            .create_async()
            .await;
        let port = Url::parse(&server.url()).unwrap().port().unwrap();
        config.shared_proxy_port = Some(port.to_string());
        assert_eq!(
            detect_topology(&config).await,
            IssuerSelection::UseShared(port)
        );
    }
}
