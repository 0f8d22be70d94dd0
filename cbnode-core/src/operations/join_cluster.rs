use crate::node::admin_url;
use crate::{AuthMode, ClusterGateway, HealthMonitor, MembershipCoordinator, Result, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

const ALREADY_MEMBER_MARKER: &str = "Node is already part of cluster";

const FIND_PEER_POLICY: RetryPolicy = RetryPolicy::linear(10, Duration::from_secs(10));
const ADD_NODE_POLICY: RetryPolicy = RetryPolicy::linear(10, Duration::from_secs(10));
const REBALANCE_WAIT_POLICY: RetryPolicy = RetryPolicy::linear(10, Duration::from_secs(100));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClusterOperationResult {
    pub peer: String,
    pub added: bool,
    pub known_nodes: Vec<String>,
}

/// Integrates a non-first node into a running cluster through any live peer.
///
/// Every joiner triggers its own rebalance; when several nodes join at once
/// the cluster serializes the resulting rebalances.
#[derive(Clone)]
pub struct JoinClusterOperation {
    membership: MembershipCoordinator,
    health: HealthMonitor,
    gateway: Arc<ClusterGateway>,
    address: String,
    admin_port: u16,
}

impl JoinClusterOperation {
    pub fn new(
        membership: MembershipCoordinator,
        health: HealthMonitor,
        gateway: Arc<ClusterGateway>,
        address: impl Into<String>,
        admin_port: u16,
    ) -> Self {
        Self {
            membership,
            health,
            gateway,
            address: address.into(),
            admin_port,
        }
    }

    pub async fn run(&self) -> Result<JoinClusterOperationResult> {
        tracing::info!("Joining existing cluster");
        let membership = &self.membership;

        let peer = FIND_PEER_POLICY
            .run("find live peer", move || async move {
                match membership.find_live_peer().await {
                    Ok(peer) => Ok(peer),
                    Err(error) => {
                        tracing::warn!("Finding a live peer failed: {}. Trying again", error);
                        Ok(None)
                    }
                }
            })
            .await?;

        self.join_peer(&peer).await
    }

    pub async fn join_peer(&self, peer: &str) -> Result<JoinClusterOperationResult> {
        tracing::info!("Joining cluster through live peer {}", peer);

        let in_cluster = self.health.is_member_healthy(&self.address, peer).await?;
        if in_cluster {
            tracing::info!("{} is already a healthy member, skipping add", self.address);
        } else {
            self.add_node_with_retry(peer).await?;
        }

        self.wait_until_no_rebalance(peer).await?;
        let known_nodes = self.trigger_rebalance(peer).await?;

        Ok(JoinClusterOperationResult {
            peer: peer.to_string(),
            added: !in_cluster,
            known_nodes,
        })
    }

    async fn add_node_with_retry(&self, peer: &str) -> Result<()> {
        ADD_NODE_POLICY
            .run("add node", move || async move {
                match self.add_node(peer).await {
                    Ok(()) => Ok(Some(())),
                    Err(error) => {
                        tracing::warn!("Adding node through {} failed: {}", peer, error);
                        Ok(None)
                    }
                }
            })
            .await
    }

    /// Ask `peer` to add this node. An "already part of cluster" rejection
    /// counts as success.
    pub async fn add_node(&self, peer: &str) -> Result<()> {
        let url = admin_url(peer, self.admin_port, "/controller/addNode");
        let credentials = self.gateway.credentials();
        let fields = [
            ("hostname", self.address.as_str()),
            ("user", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];

        tracing::info!("Adding node {} through {}", self.address, url);

        match self
            .gateway
            .submit_form(AuthMode::Configured, &url, &fields)
            .await
        {
            Ok(()) => Ok(()),
            Err(error)
                if error
                    .response_body()
                    .is_some_and(|body| body.contains(ALREADY_MEMBER_MARKER)) =>
            {
                tracing::info!("Node was already part of cluster, so no need to add");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn wait_until_no_rebalance(&self, peer: &str) -> Result<()> {
        let health = &self.health;

        REBALANCE_WAIT_POLICY
            .run("wait for rebalance", move || async move {
                if health.is_rebalancing(peer).await? {
                    tracing::info!("Rebalance in progress on {}", peer);
                    Ok(None)
                } else {
                    tracing::info!("No rebalance in progress");
                    Ok(Some(()))
                }
            })
            .await
    }

    /// Start a rebalance over every member `peer` knows, ejecting nobody.
    /// Does not wait for it to finish.
    pub async fn trigger_rebalance(&self, peer: &str) -> Result<Vec<String>> {
        let known_nodes = self.health.otp_node_ids(peer).await?;
        let joined = known_nodes.join(",");
        let url = admin_url(peer, self.admin_port, "/controller/rebalance");

        tracing::info!("Triggering rebalance on {} with known nodes {}", peer, joined);

        self.gateway
            .submit_form(
                AuthMode::Configured,
                &url,
                &[("ejectedNodes", ""), ("knownNodes", joined.as_str())],
            )
            .await?;

        Ok(known_nodes)
    }
}
