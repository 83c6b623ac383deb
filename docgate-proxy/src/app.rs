//! HTTP surfaces of the document proxy
//!
//! Two inbound surfaces share one router: the internal registration endpoint
//! (trusted callers only, authenticated by the internal trust secret) and
//! the public resolution endpoint a browser hits. Resolution never blocks
//! registration or vice versa; the only shared mutable state is the rate
//! limiter window and the breaker, each behind its own lock.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use hyper::header;
use docgate_core::{
    breaker::{BreakerDecision, BreakerSnapshot, CircuitBreaker},
    config::{CredentialVault, ProxyConfig, ProxyMode},
    issuer::{LinkIssuer, LocalLinkIssuer, RegistrationRequest, TRUST_HEADER},
    metrics::Metrics,
    ratelimit::{Admission, SlidingWindowLimiter},
    store::{LinkStore, Resolution},
    token::SealedCodec,
    trust::InternalTrust,
    upstream::DocumentFetcher,
    Error,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub store: Arc<dyn LinkStore>,
    pub codec: Option<Arc<SealedCodec>>,
    pub issuer: Arc<LocalLinkIssuer>,
    pub trust: InternalTrust,
    pub vault: CredentialVault,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub fetcher: Arc<DocumentFetcher>,
    pub metrics: Metrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn LinkStore>,
        codec: Option<Arc<SealedCodec>>,
        trust: InternalTrust,
        vault: CredentialVault,
        fetcher: DocumentFetcher,
    ) -> Self {
        let issuer = Arc::new(LocalLinkIssuer::new(
            store.clone(),
            codec.clone(),
            config.public_base_url(),
            config.default_ttl(),
        ));
        Self {
            config,
            store,
            codec,
            issuer,
            trust,
            vault,
            limiter: Arc::new(SlidingWindowLimiter::upstream_policy()),
            breaker: Arc::new(CircuitBreaker::upstream_policy()),
            fetcher: Arc::new(fetcher),
            metrics: Metrics::new(),
            start_time: Instant::now(),
        }
    }
}

/// Structured error body with a stable code
#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

/// Map an error to its public response
///
/// The body never echoes the upstream credential, the internal document id,
/// or anything that would distinguish a wrong trust secret from a missing
/// one.
fn error_response(err: &Error) -> Response {
    let (status, retry_after, message) = match err {
        Error::LinkExpired => (
            StatusCode::GONE,
            None,
            "This download link has expired. Request a fresh link.".to_string(),
        ),
        Error::LinkNotFound => (
            StatusCode::NOT_FOUND,
            None,
            "Unknown or invalid download link.".to_string(),
        ),
        Error::RateLimited { retry_after } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(retry_after.as_secs().max(1)),
            "Rate limit exceeded. The upstream allows 5 downloads per 10 seconds.".to_string(),
        ),
        Error::CircuitOpen { retry_after } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Some(retry_after.as_secs().max(1)),
            "The upstream is currently unavailable. Retry shortly.".to_string(),
        ),
        Error::Network(_) | Error::Timeout | Error::UpstreamStatus(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            None,
            "The upstream did not return the document. Retrying later may succeed.".to_string(),
        ),
        Error::Authentication => (
            StatusCode::UNAUTHORIZED,
            None,
            "Authentication failed".to_string(),
        ),
        Error::Validation(msg) => (StatusCode::BAD_REQUEST, None, msg.clone()),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Internal error".to_string(),
        ),
    };

    let mut response = (
        status,
        Json(ErrorBody {
            code: err.wire_code(),
            message,
            retry_after,
        }),
    )
        .into_response();

    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Health payload for the root endpoint
#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    mode: ProxyMode,
    links: usize,
    breaker: BreakerSnapshot,
    uptime_seconds: u64,
}

/// GET / - Health check, also the shared-proxy detection probe target
async fn health_check(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        service: "docgate-proxy",
        version: docgate_core::VERSION,
        mode: state.config.mode,
        links: state.store.len().unwrap_or(0),
        breaker: state.breaker.snapshot(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// POST /links - Mint a download link (trusted callers only)
async fn register_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegistrationRequest>,
) -> Response {
    let presented = headers
        .get(TRUST_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.trust.verify(presented) {
        // Uniform rejection: wrong and missing secrets look identical
        state.metrics.record_registration_rejected();
        warn!("registration rejected: trust verification failed");
        return error_response(&Error::Authentication);
    }

    if state.vault.resolve(&request.credential_ref).is_none() {
        state.metrics.record_registration_rejected();
        return error_response(&Error::Validation(format!(
            "Unknown credential_ref '{}'",
            request.credential_ref
        )));
    }

    match state.issuer.issue(request).await {
        Ok(issued) => {
            state.metrics.record_registration();
            info!(expires_at = %issued.expires_at, "registered download link");
            (StatusCode::OK, Json(issued)).into_response()
        }
        Err(err) => {
            state.metrics.record_registration_rejected();
            error_response(&err)
        }
    }
}

/// GET /download/{token} - Resolve a link and stream the document
async fn resolve_document(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    let started = Instant::now();

    match try_resolve(&state, &token, started).await {
        Ok(response) => response,
        Err(err) => {
            state.metrics.record_resolution_failure();
            match &err {
                // Expired vs missing changes the user guidance, so they log apart
                Error::LinkExpired => info!("resolution failed: link expired"),
                Error::LinkNotFound => warn!("resolution failed: unknown token"),
                Error::RateLimited { retry_after } => {
                    info!(retry_after_secs = retry_after.as_secs(), "resolution rate limited")
                }
                Error::CircuitOpen { .. } => info!("resolution fast-failed: circuit open"),
                other => error!("resolution failed: {}", other),
            }
            error_response(&err)
        }
    }
}

async fn try_resolve(state: &AppState, token: &str, started: Instant) -> Result<Response, Error> {
    // 1. Decode the token and check expiry
    let link = match state.store.resolve(token)? {
        Resolution::Found(link) => link,
        Resolution::Expired => return Err(Error::LinkExpired),
        Resolution::NotFound => return Err(classify_missing(state, token)),
    };

    // 2. Fail fast while the upstream is known to be down
    if let BreakerDecision::FastFail { retry_after } = state.breaker.check() {
        state.metrics.record_circuit_rejection();
        return Err(Error::CircuitOpen { retry_after });
    }

    // 3. Respect the upstream rate limit; deny with a retry hint, never spin
    if let Admission::Denied { retry_after } = state.limiter.admit() {
        state.metrics.record_rate_limited();
        return Err(Error::RateLimited { retry_after });
    }

    // 4. Fetch with the stored credential; the request never supplies one
    let api_key = state
        .vault
        .resolve(&link.credential_ref)
        .ok_or_else(|| Error::Internal("Credential reference not configured".to_string()))?;

    let upstream = match state.fetcher.fetch(&link.upstream_url, api_key).await {
        Ok(response) => {
            state.breaker.record_success();
            response
        }
        Err(err) => {
            if err.is_upstream_failure() {
                state.breaker.record_failure();
                state.metrics.record_upstream_failure();
            }
            return Err(err);
        }
    };

    state.store.record_consumption(token)?;

    let content_length = upstream.content_length().unwrap_or(0);
    state
        .metrics
        .record_resolution(content_length as usize, started.elapsed().as_micros() as u64);

    // 5. Stream the body back under the friendly filename
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", link.filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    info!(filename = %link.filename, "streaming document");

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}

/// Classify a token with no store row
///
/// In shared mode a MAC-valid token whose row was swept is still provably
/// ours, so it reports expired rather than unknown.
fn classify_missing(state: &AppState, token: &str) -> Error {
    if let Some(codec) = &state.codec {
        if let Ok(claims) = codec.open(token) {
            if claims.is_expired(Utc::now()) {
                return Error::LinkExpired;
            }
        }
    }
    Error::LinkNotFound
}

/// Rate limit status payload
#[derive(Serialize)]
struct RateLimitBody {
    max_requests: usize,
    window_secs: u64,
    remaining: usize,
    reset_in_secs: u64,
}

/// GET /rate-limit - Remaining quota in the current window
async fn rate_limit_status(State(state): State<AppState>) -> Json<RateLimitBody> {
    Json(RateLimitBody {
        max_requests: state.limiter.max_requests(),
        window_secs: state.limiter.window().as_secs(),
        remaining: state.limiter.remaining(),
        reset_in_secs: state.limiter.reset_in().as_secs(),
    })
}

/// GET /metrics - Prometheus metrics
async fn get_metrics(State(state): State<AppState>) -> String {
    state.metrics.prometheus_format()
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'self'"),
    );
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ]);

    Router::new()
        .route("/", get(health_check))
        .route("/links", post(register_link))
        .route("/download/:token", get(resolve_document))
        .route("/rate-limit", get(rate_limit_status))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .layer(DefaultBodyLimit::max(docgate_core::MAX_REQUEST_SIZE))
        .with_state(state)
}
