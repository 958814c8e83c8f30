//! Warpgate Routing
//!
//! This crate owns the egress side of route selection:
//! - The fixed list of egress routes built at startup
//! - Rotation of the active route when the upstream rate-limits it
//! - Out-of-band recovery of a failed route's network egress

pub mod refresher;
pub mod rotator;

pub use refresher::{DockerRefresher, NoopRefresher, RouteRefresher};
pub use rotator::{DEFAULT_WARMUP, EgressRoute, EgressRotator, parse_routes};

/// Routing errors
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Invalid proxy address '{0}': expected http, https, socks5 or socks5h")]
    InvalidProxy(String),

    #[error("Refresh of '{handle}' failed: {message}")]
    Refresh { handle: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RoutingError>;
