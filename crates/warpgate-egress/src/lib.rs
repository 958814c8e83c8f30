//! Warpgate Egress
//!
//! This crate talks to the upstream chat service:
//! - HTTP clients bound to an egress route, with browser-like headers
//! - The identity pool (anonymous sessions or registered accounts per route)
//! - The chat call and parsing of the upstream event stream

pub mod client;
pub mod identity;
pub mod upstream;

pub use client::{HttpClientConfig, create_client};
pub use identity::{Credentials, Identity, IdentityKind, IdentityPool, IdentityPoolConfig};
pub use upstream::{UpstreamConnector, parse_event_stream, upstream_events};

/// Egress errors
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, EgressError>;
