//! Warpgate Ingress Adapters
//!
//! This crate provides the client-facing HTTP surface:
//! - OpenAI-compatible endpoints
//! - Anthropic-compatible endpoints
//! - Protocol translation to and from the upstream chat stream
//! - The per-request dispatcher (identity acquisition, rotation on failure)

pub mod anthropic;
pub mod dispatcher;
pub mod multi_dialect;
pub mod openai;
pub mod translator;
pub mod types;

pub use dispatcher::{ChatCall, DispatcherConfig, RequestDispatcher};
pub use translator::{ClientEvent, ClientResponse, Dialect, ResponseContext};
pub use types::{IngressError, IngressResult, RequestId};
