//! Multi-Dialect Ingress Router
//!
//! Accepts both OpenAI and Anthropic API formats on one listener. Routes are
//! determined by the incoming endpoint path:
//! - /v1/chat/completions → OpenAI format
//! - /v1/models → OpenAI format
//! - /v1/messages → Anthropic format

use axum::Router;
use std::sync::Arc;

use crate::dispatcher::RequestDispatcher;

/// Create a dual-dialect router sharing one dispatcher
pub fn router(dispatcher: Arc<RequestDispatcher>) -> Router {
    let openai_router = crate::openai::router(dispatcher.clone());
    let anthropic_router = crate::anthropic::router(dispatcher);

    openai_router.merge(anthropic_router)
}
