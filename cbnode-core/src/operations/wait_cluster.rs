use crate::retry::retry_loop;
use crate::{HealthMonitor, MembershipCoordinator, Result};
use std::time::Duration;

const WAIT_STEP: Duration = Duration::from_secs(10);

/// Blocks until the cluster behind the membership directory looks healthy.
/// Used by external tooling, not by the bootstrap flow.
#[derive(Clone)]
pub struct WaitClusterOperation {
    membership: MembershipCoordinator,
    health: HealthMonitor,
}

impl WaitClusterOperation {
    pub fn new(membership: MembershipCoordinator, health: HealthMonitor) -> Self {
        Self { membership, health }
    }

    /// Wait until every member reported by some live peer is healthy.
    pub async fn until_running(&self, max_attempts: u32) -> Result<()> {
        self.wait(None, max_attempts).await
    }

    /// Wait until at least `num_nodes` members exist and all are healthy.
    pub async fn until_num_nodes_running(&self, num_nodes: usize, max_attempts: u32) -> Result<()> {
        self.wait(Some(num_nodes), max_attempts).await
    }

    async fn wait(&self, num_nodes: Option<usize>, max_attempts: u32) -> Result<()> {
        let membership = &self.membership;
        let health = &self.health;

        retry_loop(
            "wait for cluster",
            move || async move {
                let peer = match membership.find_live_peer().await {
                    Ok(Some(peer)) => peer,
                    Ok(None) => {
                        tracing::info!("No live peer published yet");
                        return Ok(None);
                    }
                    Err(error) => {
                        tracing::info!("Finding a live peer failed: {}", error);
                        return Ok(None);
                    }
                };

                tracing::info!("Checking cluster health through {}", peer);
                let healthy = match num_nodes {
                    Some(num_nodes) => health.count_healthy(num_nodes, &peer).await,
                    None => health.all_healthy(&peer).await,
                };

                match healthy {
                    Ok(true) => Ok(Some(())),
                    Ok(false) => Ok(None),
                    Err(error) => {
                        tracing::info!("Cluster health check failed: {}", error);
                        Ok(None)
                    }
                }
            },
            |attempt| (attempt <= max_attempts).then(|| WAIT_STEP.saturating_mul(attempt)),
        )
        .await?;

        tracing::info!("Cluster is running");
        Ok(())
    }
}
