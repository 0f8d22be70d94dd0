use crate::node::{admin_url, hostname_host};
use crate::{CbError, ClusterGateway, Result, RetryPolicy};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const HEALTHY_STATUS: &str = "healthy";

const READINESS_POLICY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(10));

/// One member as reported by `/pools/default`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterNodeStatus {
    pub hostname: String,
    #[serde(rename = "otpNode")]
    pub otp_node: String,
    pub status: String,
}

impl ClusterNodeStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY_STATUS
    }
}

#[derive(Debug, Deserialize)]
struct PoolsDefault {
    nodes: Vec<ClusterNodeStatus>,
}

#[derive(Debug, Deserialize)]
struct RebalanceProgress {
    status: String,
}

#[derive(Clone)]
pub struct HealthMonitor {
    gateway: Arc<ClusterGateway>,
    admin_port: u16,
}

impl HealthMonitor {
    /// Peers are assumed to serve the admin API on the same port as this node.
    pub fn new(gateway: Arc<ClusterGateway>, admin_port: u16) -> Self {
        Self {
            gateway,
            admin_port,
        }
    }

    fn url(&self, host: &str, path: &str) -> String {
        admin_url(host, self.admin_port, path)
    }

    pub async fn wait_for_admin_api(&self, host: &str) -> Result<()> {
        let url = self.url(host, "/");
        let url = url.as_str();
        let gateway = self.gateway.as_ref();

        READINESS_POLICY
            .run("wait for admin api", move || async move {
                tracing::info!("Waiting for REST service at {} to be up", url);
                match gateway.probe(url).await {
                    Ok(status) if status.as_u16() == 200 => {
                        tracing::info!("REST service appears to be up");
                        Ok(Some(()))
                    }
                    Ok(status) => {
                        tracing::info!("REST service returned {}, not up yet", status);
                        Ok(None)
                    }
                    Err(error) => {
                        tracing::info!("REST service not reachable yet: {}", error);
                        Ok(None)
                    }
                }
            })
            .await
    }

    /// Read `implementationVersion` from `/pools`, retrying while the server
    /// is still coming up.
    pub async fn fetch_cluster_version(&self, host: &str) -> Result<String> {
        let url = self.url(host, "/pools");
        let url = url.as_str();
        let gateway = self.gateway.as_ref();

        let version = READINESS_POLICY
            .run("fetch cluster version", move || async move {
                let pools: Map<String, Value> = match gateway.fetch_json(url).await {
                    Ok(pools) => pools,
                    Err(error) => {
                        tracing::info!(
                            "Got error {} fetching cluster details, assuming the server is not up yet",
                            error
                        );
                        return Ok(None);
                    }
                };

                match pools.get("implementationVersion") {
                    Some(Value::String(version)) => Ok(Some(version.clone())),
                    _ => Err(CbError::Decode(
                        "expected implementationVersion to contain a string".to_string(),
                    )),
                }
            })
            .await?;

        tracing::info!("Cluster version: {}", version);
        Ok(version)
    }

    pub async fn list_member_statuses(&self, peer: &str) -> Result<Vec<ClusterNodeStatus>> {
        let pools: PoolsDefault = self.gateway.fetch_json(&self.url(peer, "/pools/default")).await?;
        tracing::debug!("Cluster members reported by {}: {:?}", peer, pools.nodes);
        Ok(pools.nodes)
    }

    pub async fn all_healthy(&self, peer: &str) -> Result<bool> {
        let members = self.list_member_statuses(peer).await?;
        Ok(members_healthy(&members, None))
    }

    /// `false` without looking at statuses when fewer than `min_expected`
    /// members are listed.
    pub async fn count_healthy(&self, min_expected: usize, peer: &str) -> Result<bool> {
        let members = self.list_member_statuses(peer).await?;
        Ok(members_healthy(&members, Some(min_expected)))
    }

    /// Whether `peer` lists `address` as a healthy member.
    pub async fn is_member_healthy(&self, address: &str, peer: &str) -> Result<bool> {
        let members = self.list_member_statuses(peer).await?;

        for member in members
            .iter()
            .filter(|member| hostname_host(&member.hostname) == address)
        {
            if member.is_healthy() {
                return Ok(true);
            }
            tracing::info!(
                "{} in cluster, but status not healthy: {}",
                address,
                member.status
            );
        }

        Ok(false)
    }

    pub async fn otp_node_ids(&self, peer: &str) -> Result<Vec<String>> {
        let members = self.list_member_statuses(peer).await?;
        Ok(members.into_iter().map(|member| member.otp_node).collect())
    }

    /// Anything other than a `"none"` status counts as rebalancing.
    pub async fn is_rebalancing(&self, peer: &str) -> Result<bool> {
        let progress: RebalanceProgress = self
            .gateway
            .fetch_json(&self.url(peer, "/pools/default/rebalanceProgress"))
            .await?;
        Ok(progress.status != "none")
    }
}

fn members_healthy(members: &[ClusterNodeStatus], min_expected: Option<usize>) -> bool {
    if let Some(min_expected) = min_expected {
        if members.len() < min_expected {
            tracing::info!(
                "Not enough nodes are up. Expected {}, got {}",
                min_expected,
                members.len()
            );
            return false;
        }
    }

    match members.iter().find(|member| !member.is_healthy()) {
        Some(member) => {
            tracing::info!(
                "Node {} status not healthy: {}",
                member.hostname,
                member.status
            );
            false
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(host: &str, status: &str) -> ClusterNodeStatus {
        ClusterNodeStatus {
            hostname: format!("{}:8091", host),
            otp_node: format!("ns_1@{}", host),
            status: status.to_string(),
        }
    }

    #[test]
    fn test_count_fails_closed_below_minimum() {
        let members = vec![member("10.0.0.1", "healthy"), member("10.0.0.2", "healthy")];
        assert!(!members_healthy(&members, Some(3)));
        assert!(members_healthy(&members, Some(2)));
        assert!(members_healthy(&members, None));
    }

    #[test]
    fn test_unhealthy_member() {
        let members = vec![member("10.0.0.1", "healthy"), member("10.0.0.2", "warmup")];
        assert!(!members_healthy(&members, None));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let body = r#"{"nodes":[{"hostname":"10.0.0.1:8091","status":"healthy"}]}"#;
        assert!(serde_json::from_str::<PoolsDefault>(body).is_err());

        let body = r#"{"nodes":[{"hostname":"10.0.0.1:8091","otpNode":"ns_1@10.0.0.1","status":"healthy","clusterMembership":"active"}]}"#;
        let pools: PoolsDefault = serde_json::from_str(body).unwrap();
        assert_eq!(pools.nodes, vec![member("10.0.0.1", "healthy")]);
    }
}
