//! Per-request state machine
//!
//! parse → classify → build upstream payload → acquire identity → call
//! upstream → interpret status → stream or aggregate.
//!
//! Every request gets a `REQ-000001` style id and a tracing span carrying it,
//! so all log lines of a request (errors included) share the id.

use crate::translator::{
    ClientEvent, Dialect, ResponseContext, aggregate, canned_response, canned_stream, flatten,
    is_trivial, map_model, stream_translate,
};
use crate::types::{IngressError, IngressResult, RequestId};
use axum::http::StatusCode;
use axum::response::{
    IntoResponse, Response,
    sse::{KeepAlive, Sse},
};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use warpgate_core::conversation::Conversation;
use warpgate_core::ids::IdGenerator;
use warpgate_core::upstream::UpstreamChatRequest;
use warpgate_egress::{Identity, IdentityPool, UpstreamConnector, upstream_events};
use warpgate_observability::{Metrics, RequestOutcome};

/// Bytes of an upstream error body that are logged
const ERROR_BODY_PEEK: usize = 512;

/// A parsed client request, independent of dialect
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub model: String,
    pub conversation: Conversation,
    pub stream: bool,
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Identity acquisition attempts before answering 503
    pub identity_attempts: u32,

    /// Fixed pause after each failed acquisition attempt
    pub retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            identity_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Drives one client request from payload to response
pub struct RequestDispatcher {
    pool: Arc<IdentityPool>,
    connector: UpstreamConnector,
    ids: Arc<dyn IdGenerator>,
    config: DispatcherConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RequestDispatcher {
    pub fn new(
        pool: Arc<IdentityPool>,
        connector: UpstreamConnector,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            pool,
            connector,
            ids,
            config: DispatcherConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &Arc<IdentityPool> {
        &self.pool
    }

    /// Handle one request. `parse` turns the raw body into a [`ChatCall`];
    /// its errors are answered like any other failure of the request.
    pub async fn dispatch<F>(&self, dialect: Dialect, parse: F) -> Response
    where
        F: FnOnce() -> IngressResult<ChatCall>,
    {
        let request_id = RequestId::generate();
        let span = info_span!("request", id = %request_id, dialect = dialect.as_str());
        let started = Instant::now();

        let result = match parse() {
            Ok(call) => {
                self.handle(dialect, call, started)
                    .instrument(span.clone())
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                span.in_scope(|| {
                    error!(
                        status = e.status_code().as_u16(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Request failed: {}",
                        e
                    )
                });
                record(self.metrics.as_deref(), dialect, e.outcome(), started);
                e.into_response()
            }
        }
    }

    async fn handle(
        &self,
        dialect: Dialect,
        call: ChatCall,
        started: Instant,
    ) -> IngressResult<Response> {
        if is_trivial(&call.conversation) {
            info!("Trivial request, answering with canned reply");
            record(self.metrics.as_deref(), dialect, RequestOutcome::Trivial, started);
            return Ok(if call.stream {
                sse_response(canned_stream(dialect))
            } else {
                canned_response(dialect).into_response()
            });
        }

        info!(
            model = %call.model,
            messages = call.conversation.len(),
            mode = if call.stream { "stream" } else { "non-stream" },
            "Chat request"
        );
        for (index, message) in call.conversation.messages().iter().enumerate() {
            debug!(index, role = ?message.role, len = message.text().len(), "Message");
        }

        let text = flatten(&call.conversation);
        debug!(len = text.len(), "Flattened conversation");

        let model = map_model(&call.model);
        let request = UpstreamChatRequest::new(self.ids.as_ref(), text, model.clone());

        let identity = self.acquire_identity().await?;
        let route_index = identity.route_index();
        let refresh_handle = route_index
            .and_then(|index| self.pool.rotator().handle_for(index))
            .unwrap_or_default();
        info!(
            route = ?route_index,
            handle = refresh_handle,
            account = identity.email().unwrap_or("anonymous"),
            target_model = %model,
            "Forwarding to upstream"
        );
        debug!(
            upstream_id = %request.id,
            message_id = %request.message.id,
            text_len = request.text_len(),
            "Upstream request"
        );

        let response = self
            .connector
            .send_chat(&identity, &request)
            .await
            .map_err(|e| IngressError::Internal(format!("Upstream request failed: {}", e)))?;

        let status = response.status();
        if let Some(metrics) = &self.metrics {
            metrics.record_upstream_status(status.as_u16());
        }

        if status != StatusCode::OK {
            let body = peek_body(response).await;
            error!(status = status.as_u16(), body = %body, "Upstream error");
            self.release_route(&identity).await;

            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Upstream rate limited");
                IngressError::RateLimited
            } else {
                IngressError::UpstreamError(status.as_u16())
            });
        }

        let ctx = ResponseContext::new(dialect, model);
        let events = upstream_events(response);

        if call.stream {
            let completion =
                StreamCompletion::new(dialect, started, self.metrics.clone(), Span::current());
            Ok(sse_response(track_completion(
                stream_translate(events, ctx),
                completion,
            )))
        } else {
            let response = aggregate(events, ctx).await;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                length = response.text().len(),
                "Request completed"
            );
            record(self.metrics.as_deref(), dialect, RequestOutcome::Success, started);
            Ok(response.into_response())
        }
    }

    /// `get_or_create` with bounded fixed-delay retries
    async fn acquire_identity(&self) -> IngressResult<Arc<Identity>> {
        let attempts = self.config.identity_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.pool.get_or_create().await {
                Ok(identity) => return Ok(identity),
                Err(e) => {
                    warn!(attempt, attempts, "Failed to acquire identity: {}", e);
                    last_error = Some(e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        Err(IngressError::ServiceUnavailable(match last_error {
            Some(e) => format!("no identity after {} attempts: {}", attempts, e),
            None => "no identity attempts configured".to_string(),
        }))
    }

    /// Rotate egress and drop the identity bound to the route that failed
    async fn release_route(&self, identity: &Identity) {
        let rotated_to = self.pool.rotator().on_rate_limit();
        let evicted = self.pool.evict(identity.route_index()).await;
        debug!(route = ?identity.route_index(), next = ?rotated_to, evicted, "Released route");
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("pool", &self.pool)
            .field("connector", &self.connector)
            .field("config", &self.config)
            .finish()
    }
}

fn record(metrics: Option<&Metrics>, dialect: Dialect, outcome: RequestOutcome, started: Instant) {
    if let Some(metrics) = metrics {
        metrics.record_request(dialect.as_str(), outcome, started.elapsed().as_secs_f64());
    }
}

/// Logs and records a streamed request once, when its terminal event goes
/// out or, failing that, when the stream is dropped.
struct StreamCompletion {
    dialect: Dialect,
    started: Instant,
    metrics: Option<Arc<Metrics>>,
    span: Span,
    chunks: usize,
    finished: bool,
}

impl StreamCompletion {
    fn new(dialect: Dialect, started: Instant, metrics: Option<Arc<Metrics>>, span: Span) -> Self {
        Self {
            dialect,
            started,
            metrics,
            span,
            chunks: 0,
            finished: false,
        }
    }

    fn observe(&mut self, event: &ClientEvent) {
        if self.finished {
            return;
        }
        if !event.is_terminal() {
            self.chunks += 1;
            return;
        }

        self.finished = true;
        let _enter = self.span.enter();
        info!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            chunks = self.chunks,
            "Stream completed"
        );
        record(
            self.metrics.as_deref(),
            self.dialect,
            RequestOutcome::Success,
            self.started,
        );
    }
}

impl Drop for StreamCompletion {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _enter = self.span.enter();
        warn!(
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            chunks = self.chunks,
            "Client disconnected before stream completed"
        );
        record(
            self.metrics.as_deref(),
            self.dialect,
            RequestOutcome::ClientDisconnected,
            self.started,
        );
    }
}

fn track_completion(
    events: BoxStream<'static, ClientEvent>,
    mut completion: StreamCompletion,
) -> BoxStream<'static, ClientEvent> {
    events
        .inspect(move |event| completion.observe(event))
        .boxed()
}

fn sse_response(events: BoxStream<'static, ClientEvent>) -> Response {
    Sse::new(events.map(|event| event.to_sse()))
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// First bytes of an error body, lossily decoded
async fn peek_body(mut response: reqwest::Response) -> String {
    let mut buf = Vec::with_capacity(ERROR_BODY_PEEK);
    while buf.len() < ERROR_BODY_PEEK {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                debug!("Failed to read upstream error body: {}", e);
                break;
            }
        }
    }
    buf.truncate(ERROR_BODY_PEEK);
    String::from_utf8_lossy(&buf).into_owned()
}
