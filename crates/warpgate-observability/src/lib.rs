//! Warpgate Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Structured logging setup
//! - Health and metrics endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthState, health_router};
pub use logging::{LogFormat, LoggingConfig, LoggingError, init_logging};
pub use metrics::{Metrics, RequestOutcome};
