//! Application assembly
//!
//! Wires the egress rotator, identity pool and dispatcher from a
//! [`ServerConfig`] and merges the API and observability routers.

use crate::config::ServerConfig;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use warpgate_core::ids::{IdGenerator, RandomIdGenerator};
use warpgate_egress::{IdentityKind, IdentityPool, IdentityPoolConfig, UpstreamConnector};
use warpgate_ingress::{RequestDispatcher, multi_dialect};
use warpgate_observability::{HealthState, Metrics, health_router};
use warpgate_routing::{DockerRefresher, EgressRotator, RouteRefresher, parse_routes};

/// Build the full router. `refresher` recovers rate-limited egress routes.
pub fn build_app(
    config: &ServerConfig,
    refresher: Arc<dyn RouteRefresher>,
    metrics: Arc<Metrics>,
) -> anyhow::Result<Router> {
    let routes = parse_routes(&config.proxies, &config.containers)?;
    if routes.is_empty() {
        info!("No egress proxies configured, connecting directly");
    }
    for route in &routes {
        info!(
            index = route.index,
            address = %route.address,
            handle = %route.refresh_handle,
            "Egress route"
        );
    }

    let rotator = Arc::new(
        EgressRotator::new(routes, refresher)
            .with_warmup(Duration::from_secs(config.warmup_secs))
            .with_metrics(Arc::clone(&metrics)),
    );

    let kind = if config.use_auth {
        IdentityKind::Registered
    } else {
        IdentityKind::Anonymous
    };
    let mut pool_config = IdentityPoolConfig::new(&config.base_url, kind);
    pool_config.client.timeout_secs = config.upstream_timeout_secs;

    let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
    let pool = IdentityPool::new(pool_config, rotator, Arc::clone(&ids))?
        .with_metrics(Arc::clone(&metrics));

    let dispatcher = RequestDispatcher::new(
        Arc::new(pool),
        UpstreamConnector::new(&config.base_url),
        ids,
    )
    .with_metrics(Arc::clone(&metrics));

    Ok(multi_dialect::router(Arc::new(dispatcher))
        .merge(health_router(HealthState::new(metrics)))
        .layer(TraceLayer::new_for_http()))
}

/// Router with the production refresher (`docker restart`)
pub fn build_default_app(config: &ServerConfig, metrics: Arc<Metrics>) -> anyhow::Result<Router> {
    build_app(config, Arc::new(DockerRefresher::new()), metrics)
}
