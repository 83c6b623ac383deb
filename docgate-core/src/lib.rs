// SPDX-License-Identifier: MIT
//
// Docgate: Secure Document-Access Proxy

//! Docgate Core Library
//!
//! Foundational types and services for the document-access proxy: a small
//! reverse proxy that hands browsers short-lived download links for documents
//! held behind a credentialed upstream API, without ever exposing the
//! upstream credential.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `store`: link persistence (in-memory and SQLite-backed) with expiry
//! - `token`: opaque token minting and verification
//! - `ratelimit`: sliding-window admission for outbound upstream calls
//! - `breaker`: circuit breaker guarding the upstream
//! - `trust`: shared secret authenticating internal registration calls
//! - `upstream`: credentialed HTTP client for document fetches
//! - `issuer`: link-issuance strategies (local proxy vs shared proxy)
//! - `config`: configuration management with validation
//! - `error`: unified error types

pub mod breaker;
pub mod config;
pub mod error;
pub mod issuer;
pub mod metrics;
pub mod ratelimit;
pub mod store;
pub mod token;
pub mod trust;
pub mod upstream;

pub use error::{Error, Result};
pub use store::{DownloadLink, LinkStore, Resolution};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum accepted request body size (registration payloads)
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024; // 1 MiB

/// Upstream-mandated rate limit: admissions per window
pub const RATE_LIMIT_MAX_REQUESTS: usize = 5;

/// Upstream-mandated rate limit: trailing window length in seconds
pub const RATE_LIMIT_WINDOW_SECS: u64 = 10;

/// Consecutive upstream failures before the circuit opens
pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;

/// Seconds the circuit stays open before a half-open trial
pub const BREAKER_COOLDOWN_SECS: u64 = 30;

/// Default link lifetime for a standalone (per-process) proxy
pub const DEFAULT_STANDALONE_TTL_SECS: u64 = 3_600; // 1 hour

/// Default link lifetime for the shared persistent proxy
pub const DEFAULT_SHARED_TTL_SECS: u64 = 7 * 24 * 3_600; // 7 days
