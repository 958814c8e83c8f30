//! Egress route recovery
//!
//! A rate-limited route is handed to a [`RouteRefresher`] in the background.
//! The shipped implementation restarts the container that provides the
//! route's egress so it comes back with a new network identity.

use async_trait::async_trait;
use tokio::process::Command;

use crate::rotator::EgressRoute;
use crate::{Result, RoutingError};

/// Out-of-band recovery of a route's network egress
#[async_trait]
pub trait RouteRefresher: Send + Sync {
    /// Refresh the egress behind `route`. The route is considered usable
    /// again once the rotator's warm-up interval has elapsed.
    async fn refresh(&self, route: &EgressRoute) -> Result<()>;
}

/// Restarts the route's container with `docker restart <handle>`
#[derive(Debug, Clone)]
pub struct DockerRefresher {
    program: String,
}

impl DockerRefresher {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Use a different executable with the same CLI (e.g. `podman`)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouteRefresher for DockerRefresher {
    async fn refresh(&self, route: &EgressRoute) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("restart")
            .arg(&route.refresh_handle)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RoutingError::Refresh {
                handle: route.refresh_handle.clone(),
                message: format!("{}: {}", output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

/// Refresher that does nothing; used when routes have no recovery mechanism
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresher;

#[async_trait]
impl RouteRefresher for NoopRefresher {
    async fn refresh(&self, _route: &EgressRoute) -> Result<()> {
        Ok(())
    }
}
