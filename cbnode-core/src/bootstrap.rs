//! Top-level startup sequence for one node.
//!
//! `Unstarted -> Electing -> Initializing | Joining -> Heartbeating`. Any
//! error before `Heartbeating` is returned to the caller, which is expected to
//! exit: a half-initialized node must not advertise liveness.

use crate::gateway::DEFAULT_REQUEST_TIMEOUT;
use crate::membership::DEFAULT_HEARTBEAT_TTL;
use crate::registry::{CoordinationKeys, DynStore};
use crate::{
    CbError, ClusterGateway, DynHost, HealthMonitor, InitClusterOperation, JoinClusterOperation,
    MembershipCoordinator, NodeConfig, Result, RetryPolicy,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

const START_SERVICE_POLICY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(10));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    Unstarted,
    Electing,
    Initializing,
    Joining,
    Heartbeating,
}

pub struct Bootstrap {
    node: NodeConfig,
    store: DynStore,
    host: DynHost,
    keys: CoordinationKeys,
    heartbeat_ttl: Duration,
    request_timeout: Duration,
    phase: BootstrapPhase,
}

impl Bootstrap {
    pub fn new(node: NodeConfig, store: DynStore, host: DynHost) -> Self {
        Self {
            node,
            store,
            host,
            keys: CoordinationKeys::default(),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            phase: BootstrapPhase::Unstarted,
        }
    }

    pub fn keys(mut self, keys: CoordinationKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn transition(&mut self, next: BootstrapPhase) {
        tracing::info!("Bootstrap {:?} -> {:?}", self.phase, next);
        self.phase = next;
    }

    /// Bring the node up and heartbeat forever. Only returns on error.
    pub async fn run(mut self) -> Result<Infallible> {
        if self.node.address().is_empty() {
            return Err(CbError::Config(
                "local address must be set before starting the node".to_string(),
            ));
        }

        let membership =
            MembershipCoordinator::new(self.store.clone(), self.keys.clone(), self.node.address());

        let credentials = membership.load_admin_credentials().await?;
        self.node.credentials = Some(credentials.clone());

        self.transition(BootstrapPhase::Electing);
        let is_first = membership.attempt_election().await?;

        self.start_local_service().await?;

        let gateway = Arc::new(ClusterGateway::new(credentials, self.request_timeout)?);
        let health = HealthMonitor::new(gateway.clone(), self.node.admin_port);

        health.wait_for_admin_api(self.node.address()).await?;
        let version = health.fetch_cluster_version(self.node.address()).await?;
        self.node.version = Some(version);

        if is_first {
            self.transition(BootstrapPhase::Initializing);
            let result = InitClusterOperation::new(gateway, self.host.clone())
                .run(&self.node)
                .await?;
            tracing::info!(
                "Cluster initialized with {} MB quota, default bucket created: {}",
                result.memory_quota_mb,
                result.bucket_created
            );
        } else {
            self.transition(BootstrapPhase::Joining);
            let result = JoinClusterOperation::new(
                membership.clone(),
                health,
                gateway,
                self.node.address(),
                self.node.admin_port,
            )
            .run()
            .await?;
            tracing::info!(
                "Joined cluster through {}, rebalance triggered over {:?}",
                result.peer,
                result.known_nodes
            );
        }

        self.transition(BootstrapPhase::Heartbeating);
        let never = membership.run_heartbeat_loop(self.heartbeat_ttl).await;
        match never {}
    }

    async fn start_local_service(&self) -> Result<()> {
        tracing::info!("Preparing and starting local database service");
        self.host.prepare_data_directories().await?;

        let host = self.host.as_ref();
        START_SERVICE_POLICY
            .run("start database service", move || async move {
                host.start_service().await?;
                if host.service_running().await? {
                    tracing::info!("Database service running");
                    Ok(Some(()))
                } else {
                    tracing::info!("Database service not running yet");
                    Ok(None)
                }
            })
            .await
    }
}
