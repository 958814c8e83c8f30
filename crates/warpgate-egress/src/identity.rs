//! Identity pool
//!
//! Every egress route carries at most one live identity: either an anonymous
//! guest session (cookies from visiting the home page) or a freshly registered
//! account. Identities are created lazily on first use of a route and evicted
//! when the upstream rejects them.
//!
//! Each route owns a slot guarded by its own async mutex. The lock is held
//! while an identity is being acquired so concurrent callers on the same route
//! wait for a single acquisition, and released before the identity is used
//! for a chat call.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use warpgate_core::ids::IdGenerator;
use warpgate_observability::Metrics;
use warpgate_routing::{EgressRoute, EgressRotator};

use crate::client::{ACCEPT_HTML, HttpClientConfig, browser_headers, create_client};
use crate::{EgressError, Result};

/// Cookie name fragment that marks a logged-in session
const SESSION_COOKIE_MARKER: &str = "session-token";

/// Server-action state field sent with the registration form
const REGISTER_ACTION_STATE: &str = r#"[{"status":"idle"},"$K1"]"#;

/// How identities are acquired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Guest session obtained by loading the home page
    #[default]
    Anonymous,
    /// Account registered with synthetic credentials
    Registered,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Anonymous => "anonymous",
            IdentityKind::Registered => "registered",
        }
    }
}

/// Credentials of a registered identity
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// A live upstream identity bound to one egress route
pub struct Identity {
    kind: IdentityKind,
    client: Client,
    jar: Arc<Jar>,
    route_index: Option<usize>,
    credentials: Option<Credentials>,
    created_at: DateTime<Utc>,
    last_used_ms: AtomicI64,
}

impl Identity {
    fn new(
        kind: IdentityKind,
        client: Client,
        jar: Arc<Jar>,
        route_index: Option<usize>,
        credentials: Option<Credentials>,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind,
            client,
            jar,
            route_index,
            credentials,
            created_at: now,
            last_used_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    /// Client bound to this identity's egress and cookie store
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Route the identity was created on; `None` when there are no routes
    pub fn route_index(&self) -> Option<usize> {
        self.route_index
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn email(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.email.as_str())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_used_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_used_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Whether the cookie store holds a session token for `url`
    pub fn has_session_cookie(&self, url: &Url) -> bool {
        jar_has_session_cookie(&self.jar, url)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("kind", &self.kind)
            .field("route_index", &self.route_index)
            .field("credentials", &self.credentials)
            .field("created_at", &self.created_at)
            .finish()
    }
}

fn jar_has_session_cookie(jar: &Jar, url: &Url) -> bool {
    jar.cookies(url)
        .and_then(|header| header.to_str().map(str::to_owned).ok())
        .map(|cookies| {
            cookies.split(';').any(|pair| {
                pair.trim()
                    .split('=')
                    .next()
                    .is_some_and(|name| name.contains(SESSION_COOKIE_MARKER))
            })
        })
        .unwrap_or(false)
}

/// Identity pool configuration
#[derive(Debug, Clone)]
pub struct IdentityPoolConfig {
    /// Upstream base URL without trailing slash
    pub base_url: String,
    pub kind: IdentityKind,
    pub client: HttpClientConfig,
}

impl IdentityPoolConfig {
    pub fn new(base_url: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            kind,
            client: HttpClientConfig::default(),
        }
    }
}

type Slot = Mutex<Option<Arc<Identity>>>;

/// Per-route cache of live identities
pub struct IdentityPool {
    config: IdentityPoolConfig,
    base: Url,
    rotator: Arc<EgressRotator>,
    ids: Arc<dyn IdGenerator>,
    /// One slot per route, or a single direct slot when there are no routes
    slots: Vec<Slot>,
    metrics: Option<Arc<Metrics>>,
}

impl IdentityPool {
    pub fn new(
        config: IdentityPoolConfig,
        rotator: Arc<EgressRotator>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            EgressError::ConfigError(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;
        let slots = (0..rotator.len().max(1)).map(|_| Mutex::new(None)).collect();
        Ok(Self {
            config,
            base,
            rotator,
            ids,
            slots,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> IdentityKind {
        self.config.kind
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn rotator(&self) -> &Arc<EgressRotator> {
        &self.rotator
    }

    fn slot(&self, route_index: Option<usize>) -> &Slot {
        // Route indices are always < slots.len(); fall back to the first slot
        let index = route_index.unwrap_or(0);
        self.slots.get(index).unwrap_or(&self.slots[0])
    }

    /// Return the active route's identity, acquiring one if the slot is empty
    pub async fn get_or_create(&self) -> Result<Arc<Identity>> {
        let active = self.rotator.current();
        let route_index = active.as_ref().map(|(_, index)| *index);

        let mut slot = self.slot(route_index).lock().await;
        if let Some(identity) = slot.as_ref() {
            identity.touch();
            return Ok(Arc::clone(identity));
        }

        let route = active.map(|(route, _)| route);
        let identity = Arc::new(self.acquire(route.as_ref()).await?);
        *slot = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Drop the identity cached for a route. Returns whether one was present.
    pub async fn evict(&self, route_index: Option<usize>) -> bool {
        let evicted = self.slot(route_index).lock().await.take().is_some();
        if evicted {
            info!(route = ?route_index, "Identity evicted");
            if let Some(metrics) = &self.metrics {
                metrics.record_eviction();
            }
        }
        evicted
    }

    /// Identity currently cached for a route, without acquiring
    pub async fn cached(&self, route_index: Option<usize>) -> Option<Arc<Identity>> {
        self.slot(route_index).lock().await.clone()
    }

    async fn acquire(&self, route: Option<&EgressRoute>) -> Result<Identity> {
        let route_index = route.map(|r| r.index);
        let handle = route.map(|r| r.refresh_handle.as_str()).unwrap_or_default();
        info!(
            route = ?route_index,
            handle = %handle,
            kind = self.config.kind.as_str(),
            "Creating identity"
        );

        let jar = Arc::new(Jar::default());
        let client = create_client(
            &self.config.client,
            route.map(|r| r.address.as_str()),
            Arc::clone(&jar),
        )?;

        let result = match self.config.kind {
            IdentityKind::Anonymous => self
                .open_session(&client)
                .await
                .map(|()| Identity::new(IdentityKind::Anonymous, client, jar, route_index, None)),
            IdentityKind::Registered => self.register(&client, &jar).await.map(|credentials| {
                Identity::new(
                    IdentityKind::Registered,
                    client,
                    jar,
                    route_index,
                    Some(credentials),
                )
            }),
        };

        match &result {
            Ok(identity) => {
                info!(
                    route = ?route_index,
                    handle = %handle,
                    email = identity.email().unwrap_or("-"),
                    "Identity created"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_identity_created(self.config.kind.as_str());
                }
            }
            Err(EgressError::RateLimitExceeded) => {
                warn!(route = ?route_index, "Identity acquisition rate-limited");
                self.rotator.on_rate_limit();
            }
            Err(e) => {
                error!(route = ?route_index, error = %e, "Identity acquisition failed");
            }
        }
        result
    }

    async fn open_session(&self, client: &Client) -> Result<()> {
        let response = client
            .get(format!("{}/", self.config.base_url))
            .headers(browser_headers(ACCEPT_HTML))
            .send()
            .await
            .map_err(|e| EgressError::Transient(format!("Session request failed: {}", e)))?;

        debug!(status = %response.status(), "Session response");
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(EgressError::RateLimitExceeded);
        }
        Ok(())
    }

    async fn register(&self, client: &Client, jar: &Jar) -> Result<Credentials> {
        let credentials = Credentials {
            email: self.ids.new_email(),
            password: self.ids.new_credential(),
        };

        let form = reqwest::multipart::Form::new()
            .text("1_email", credentials.email.clone())
            .text("1_password", credentials.password.clone())
            .text("0", REGISTER_ACTION_STATE);

        let response = client
            .post(format!("{}/register", self.config.base_url))
            .headers(browser_headers(ACCEPT_HTML))
            .multipart(form)
            .send()
            .await
            .map_err(|e| EgressError::Transient(format!("Registration request failed: {}", e)))?;

        debug!(status = %response.status(), "Registration response");
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(EgressError::RateLimitExceeded);
        }

        let in_response = response
            .cookies()
            .any(|cookie| cookie.name().contains(SESSION_COOKIE_MARKER));
        if in_response || jar_has_session_cookie(jar, &self.base) {
            return Ok(credentials);
        }

        Err(EgressError::RegistrationRejected(format!(
            "no session token in response (status {})",
            response.status()
        )))
    }
}

impl std::fmt::Debug for IdentityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPool")
            .field("config", &self.config)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpgate_core::ids::SequentialIdGenerator;
    use warpgate_routing::NoopRefresher;

    fn pool(kind: IdentityKind, routes: Vec<EgressRoute>) -> IdentityPool {
        let rotator = Arc::new(EgressRotator::new(routes, Arc::new(NoopRefresher)));
        IdentityPool::new(
            IdentityPoolConfig::new("http://127.0.0.1:9/", kind),
            rotator,
            Arc::new(SequentialIdGenerator::new("t")),
        )
        .unwrap()
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(IdentityKind::Anonymous.as_str(), "anonymous");
        assert_eq!(IdentityKind::Registered.as_str(), "registered");
        assert_eq!(IdentityKind::default(), IdentityKind::Anonymous);
    }

    #[test]
    fn test_config_trims_trailing_slash() {
        let config = IdentityPoolConfig::new("https://demo.chat-sdk.dev/", IdentityKind::Anonymous);
        assert_eq!(config.base_url, "https://demo.chat-sdk.dev");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let rotator = Arc::new(EgressRotator::new(vec![], Arc::new(NoopRefresher)));
        let result = IdentityPool::new(
            IdentityPoolConfig::new("not a url", IdentityKind::Anonymous),
            rotator,
            Arc::new(SequentialIdGenerator::new("t")),
        );
        assert!(matches!(result, Err(EgressError::ConfigError(_))));
    }

    #[test]
    fn test_slots_sized_to_routes() {
        assert_eq!(pool(IdentityKind::Anonymous, vec![]).slots.len(), 1);
        let routes = (0..3)
            .map(|i| EgressRoute::new(i, format!("http://127.0.0.1:{}", 3000 + i), ""))
            .collect();
        assert_eq!(pool(IdentityKind::Anonymous, routes).slots.len(), 3);
    }

    #[tokio::test]
    async fn test_evict_is_idempotent() {
        let pool = pool(IdentityKind::Anonymous, vec![]);
        assert!(!pool.evict(None).await);
        assert!(!pool.evict(None).await);
        assert!(pool.cached(None).await.is_none());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            email: "a@b.c".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("a@b.c"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_jar_session_cookie_detection() {
        let url = Url::parse("https://demo.chat-sdk.dev").unwrap();
        let jar = Jar::default();
        assert!(!jar_has_session_cookie(&jar, &url));

        jar.add_cookie_str("theme=dark", &url);
        assert!(!jar_has_session_cookie(&jar, &url));

        jar.add_cookie_str("authjs.session-token=abc; Path=/", &url);
        assert!(jar_has_session_cookie(&jar, &url));
    }
}
