//! Egress route rotation
//!
//! The upstream rate-limits per network path, so requests leave through one
//! of several egress proxies. Exactly one route is active at a time. When the
//! upstream rejects a request on the active route, [`EgressRotator::on_rate_limit`]
//! moves to the next route and recovers the failed one in the background.
//!
//! ## Thread Safety
//!
//! The active index is a single atomic updated with `fetch_update`, so
//! rotations are serialized and readers never see a partial update. No lock
//! is held across an await point.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use warpgate_observability::Metrics;

use crate::refresher::RouteRefresher;
use crate::{Result, RoutingError};

/// Time a refreshed route needs before it is considered live again
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(15);

const PROXY_SCHEMES: &[&str] = &["http://", "https://", "socks5://", "socks5h://"];

/// One network egress path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EgressRoute {
    /// Position in the rotation, `0..N`
    pub index: usize,
    /// Proxy URL
    pub address: String,
    /// Name passed to the refresher; empty disables recovery
    pub refresh_handle: String,
}

impl EgressRoute {
    pub fn new(index: usize, address: impl Into<String>, refresh_handle: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
            refresh_handle: refresh_handle.into(),
        }
    }

    pub fn has_refresh_handle(&self) -> bool {
        !self.refresh_handle.is_empty()
    }
}

/// Build routes from comma-separated proxy and container lists.
///
/// Entries are trimmed and empty proxies dropped. Each surviving proxy is
/// paired with the container at the same position in the original list
/// (empty when the container list is shorter).
pub fn parse_routes(proxies: &str, containers: &str) -> Result<Vec<EgressRoute>> {
    let containers: Vec<&str> = containers.split(',').map(str::trim).collect();

    let mut routes = Vec::new();
    for (position, proxy) in proxies.split(',').map(str::trim).enumerate() {
        if proxy.is_empty() {
            continue;
        }
        if !PROXY_SCHEMES.iter().any(|scheme| proxy.starts_with(scheme)) {
            return Err(RoutingError::InvalidProxy(proxy.to_string()));
        }
        let handle = containers.get(position).copied().unwrap_or_default();
        routes.push(EgressRoute::new(routes.len(), proxy, handle));
    }
    Ok(routes)
}

/// Rotating pool of egress routes
pub struct EgressRotator {
    routes: Vec<EgressRoute>,
    current: AtomicUsize,
    rotations: AtomicU64,
    refresher: Arc<dyn RouteRefresher>,
    warmup: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl EgressRotator {
    /// Create a rotator starting at route 0
    pub fn new(routes: Vec<EgressRoute>, refresher: Arc<dyn RouteRefresher>) -> Self {
        Self {
            routes,
            current: AtomicUsize::new(0),
            rotations: AtomicU64::new(0),
            refresher,
            warmup: DEFAULT_WARMUP,
            metrics: None,
        }
    }

    /// Override the post-refresh warm-up interval
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[EgressRoute] {
        &self.routes
    }

    /// Number of rotations performed so far
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Refresh handle of a route, for logging
    pub fn handle_for(&self, index: usize) -> Option<&str> {
        self.routes.get(index).map(|r| r.refresh_handle.as_str())
    }

    /// The active route and its index; `None` when there are no routes,
    /// in which case traffic goes out directly.
    pub fn current(&self) -> Option<(EgressRoute, usize)> {
        let index = self.current.load(Ordering::Acquire);
        self.routes.get(index).map(|route| (route.clone(), index))
    }

    /// Advance to the next route and recover the one that failed.
    ///
    /// Returns the new active index, or `None` on an empty pool. Recovery is
    /// spawned and never awaited.
    pub fn on_rate_limit(&self) -> Option<usize> {
        let len = self.routes.len();
        if len == 0 {
            return None;
        }

        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |index| {
                Some((index + 1) % len)
            })
            .unwrap_or_else(|index| index);
        let next = (previous + 1) % len;

        self.rotations.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_rotation();
        }

        let failed = &self.routes[previous];
        warn!(
            from = previous,
            to = next,
            handle = %failed.refresh_handle,
            "Egress rate-limited, rotating route"
        );

        self.spawn_recovery(failed.clone());
        Some(next)
    }

    fn spawn_recovery(&self, route: EgressRoute) {
        if !route.has_refresh_handle() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(handle = %route.refresh_handle, "No async runtime, skipping route recovery");
            return;
        };

        let refresher = Arc::clone(&self.refresher);
        let warmup = self.warmup;
        runtime.spawn(async move {
            info!(handle = %route.refresh_handle, index = route.index, "Refreshing egress route");
            if let Err(e) = refresher.refresh(&route).await {
                error!(handle = %route.refresh_handle, error = %e, "Egress route refresh failed");
                return;
            }
            tokio::time::sleep(warmup).await;
            info!(handle = %route.refresh_handle, index = route.index, "Egress route live again");
        });
    }
}

impl std::fmt::Debug for EgressRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressRotator")
            .field("routes", &self.routes)
            .field("current", &self.current.load(Ordering::Relaxed))
            .field("rotations", &self.rotations())
            .field("warmup", &self.warmup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresher::NoopRefresher;
    use async_trait::async_trait;
    use mockall::mock;
    use tokio::sync::mpsc;

    mock! {
        pub Refresher {}

        #[async_trait]
        impl RouteRefresher for Refresher {
            async fn refresh(&self, route: &EgressRoute) -> Result<()>;
        }
    }

    fn routes(n: usize) -> Vec<EgressRoute> {
        (0..n)
            .map(|i| EgressRoute::new(i, format!("socks5://127.0.0.1:{}", 1080 + i), format!("warp-{i}")))
            .collect()
    }

    #[test]
    fn test_parse_routes_pairs_by_original_position() {
        let parsed = parse_routes(
            " socks5://a:1080 , , http://b:8080",
            "warp-a, warp-skipped, warp-b",
        )
        .unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], EgressRoute::new(0, "socks5://a:1080", "warp-a"));
        assert_eq!(parsed[1], EgressRoute::new(1, "http://b:8080", "warp-b"));
    }

    #[test]
    fn test_parse_routes_missing_containers() {
        let parsed = parse_routes("socks5h://a:1,https://b:2", "only-a").unwrap();
        assert_eq!(parsed[0].refresh_handle, "only-a");
        assert_eq!(parsed[1].refresh_handle, "");
        assert!(!parsed[1].has_refresh_handle());
    }

    #[test]
    fn test_parse_routes_empty_and_invalid() {
        assert!(parse_routes("", "").unwrap().is_empty());
        assert!(parse_routes(" , ,", "x").unwrap().is_empty());
        assert!(matches!(
            parse_routes("ftp://a:21", ""),
            Err(RoutingError::InvalidProxy(_))
        ));
    }

    #[test]
    fn test_current_starts_at_zero() {
        let rotator = EgressRotator::new(routes(3), Arc::new(NoopRefresher));
        let (route, index) = rotator.current().unwrap();
        assert_eq!(index, 0);
        assert_eq!(route.refresh_handle, "warp-0");
    }

    #[tokio::test]
    async fn test_rotation_advances_modulo_len() {
        let rotator = EgressRotator::new(routes(3), Arc::new(NoopRefresher));
        for k in 1..=7usize {
            assert_eq!(rotator.on_rate_limit(), Some(k % 3));
            assert_eq!(rotator.current().unwrap().1, k % 3);
        }
        assert_eq!(rotator.rotations(), 7);
    }

    #[tokio::test]
    async fn test_empty_pool_is_noop() {
        let rotator = EgressRotator::new(vec![], Arc::new(NoopRefresher));
        assert!(rotator.is_empty());
        assert!(rotator.current().is_none());
        assert_eq!(rotator.on_rate_limit(), None);
        assert_eq!(rotator.rotations(), 0);
    }

    #[tokio::test]
    async fn test_single_route_stays_on_itself() {
        let rotator = EgressRotator::new(routes(1), Arc::new(NoopRefresher));
        assert_eq!(rotator.on_rate_limit(), Some(0));
        assert_eq!(rotator.current().unwrap().1, 0);
    }

    #[tokio::test]
    async fn test_recovery_refreshes_failed_route() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut refresher = MockRefresher::new();
        refresher
            .expect_refresh()
            .withf(|route| route.refresh_handle == "warp-0")
            .times(1)
            .returning(move |route| {
                let _ = tx.send(route.index);
                Ok(())
            });

        let rotator = EgressRotator::new(routes(2), Arc::new(refresher)).with_warmup(Duration::ZERO);
        rotator.on_rate_limit();

        let refreshed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(refreshed, Some(0));
    }

    #[tokio::test]
    async fn test_recovery_failure_does_not_block_rotation() {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh().returning(|route| {
            Err(RoutingError::Refresh {
                handle: route.refresh_handle.clone(),
                message: "boom".to_string(),
            })
        });

        let rotator = EgressRotator::new(routes(2), Arc::new(refresher));
        assert_eq!(rotator.on_rate_limit(), Some(1));
        assert_eq!(rotator.on_rate_limit(), Some(0));
    }

    #[tokio::test]
    async fn test_empty_handle_skips_recovery() {
        let mut refresher = MockRefresher::new();
        refresher.expect_refresh().never();

        let rotator = EgressRotator::new(
            vec![EgressRoute::new(0, "http://a:1", ""), EgressRoute::new(1, "http://b:2", "")],
            Arc::new(refresher),
        );
        rotator.on_rate_limit();
        tokio::task::yield_now().await;
        assert_eq!(rotator.current().unwrap().1, 1);
    }

    #[tokio::test]
    async fn test_rotation_recorded_in_metrics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let rotator = EgressRotator::new(routes(2), Arc::new(NoopRefresher))
            .with_metrics(Arc::clone(&metrics));
        rotator.on_rate_limit();
        rotator.on_rate_limit();
        assert_eq!(metrics.egress_rotations_total.get(), 2.0);
    }

    #[tokio::test]
    async fn test_concurrent_rotations_are_serialized() {
        let rotator = Arc::new(EgressRotator::new(routes(4), Arc::new(NoopRefresher)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let rotator = Arc::clone(&rotator);
            handles.push(tokio::spawn(async move { rotator.on_rate_limit() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(rotator.rotations(), 10);
        assert_eq!(rotator.current().unwrap().1, 10 % 4);
    }
}
