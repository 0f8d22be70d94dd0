use crate::{AuthMode, BucketDefaults, ClusterGateway, DynHost, NodeConfig, Result};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_BUCKET_NAME: &str = "default";
pub const FALLBACK_CLUSTER_RAM_MB: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitClusterOperationResult {
    pub memory_quota_mb: u64,
    pub bucket_created: bool,
}

/// One-time setup performed by the node that won the election.
#[derive(Clone)]
pub struct InitClusterOperation {
    gateway: Arc<ClusterGateway>,
    host: DynHost,
}

impl InitClusterOperation {
    pub fn new(gateway: Arc<ClusterGateway>, host: DynHost) -> Self {
        Self { gateway, host }
    }

    pub async fn run(&self, node: &NodeConfig) -> Result<InitClusterOperationResult> {
        tracing::info!("We became first cluster node, init cluster and bucket");

        self.set_admin_credentials(node).await?;
        let memory_quota_mb = self.set_cluster_ram(node).await?;
        let bucket_created = self.create_default_bucket(node).await?;

        Ok(InitClusterOperationResult {
            memory_quota_mb,
            bucket_created,
        })
    }

    /// The only call made with the factory-default identity.
    async fn set_admin_credentials(&self, node: &NodeConfig) -> Result<()> {
        let credentials = self.gateway.credentials();
        let port = node.admin_port.to_string();

        tracing::info!("Setting cluster admin credentials for {}", credentials.username);

        self.gateway
            .submit_form(
                AuthMode::FactoryDefault,
                &node.admin_url("/settings/web"),
                &[
                    ("username", credentials.username.as_str()),
                    ("password", credentials.password.as_str()),
                    ("port", port.as_str()),
                ],
            )
            .await
    }

    async fn set_cluster_ram(&self, node: &NodeConfig) -> Result<u64> {
        let total = self.host.total_memory_mb().await;
        if let Ok(total) = &total {
            tracing::info!("Total RAM (MB) on machine: {}", total);
        }
        let quota = cluster_ram_quota_mb(total);
        let quota_str = quota.to_string();

        tracing::info!("Attempting to set cluster ram to: {} MB", quota);

        self.gateway
            .submit_form(
                AuthMode::Configured,
                &node.admin_url("/pools/default"),
                &[("memoryQuota", quota_str.as_str())],
            )
            .await?;

        Ok(quota)
    }

    pub async fn has_default_bucket(&self, node: &NodeConfig) -> Result<bool> {
        let buckets: Vec<Value> = self
            .gateway
            .fetch_json(&node.admin_url("/pools/default/buckets"))
            .await?;

        Ok(buckets.iter().any(|bucket| {
            bucket.get("name").and_then(Value::as_str) == Some(DEFAULT_BUCKET_NAME)
        }))
    }

    async fn create_default_bucket(&self, node: &NodeConfig) -> Result<bool> {
        if self.has_default_bucket(node).await? {
            tracing::info!("Default bucket already exists, nothing to do");
            return Ok(false);
        }

        let BucketDefaults {
            ram_quota_mb,
            replica_number,
            proxy_port,
        } = &node.bucket;
        let ram_quota_mb = ram_quota_mb.to_string();
        let replica_number = replica_number.to_string();
        let proxy_port = proxy_port.to_string();

        tracing::info!("Creating default bucket with {} MB", ram_quota_mb);

        self.gateway
            .submit_form(
                AuthMode::Configured,
                &node.admin_url("/pools/default/buckets"),
                &[
                    ("name", DEFAULT_BUCKET_NAME),
                    ("ramQuotaMB", ram_quota_mb.as_str()),
                    ("authType", "none"),
                    ("replicaNumber", replica_number.as_str()),
                    ("proxyPort", proxy_port.as_str()),
                ],
            )
            .await?;

        Ok(true)
    }
}

/// 75% of host memory, or a fixed fallback when memory could not be read.
pub fn cluster_ram_quota_mb(total_memory_mb: Result<u64>) -> u64 {
    match total_memory_mb {
        Ok(total) => total * 75 / 100,
        Err(error) => {
            tracing::warn!(
                "Failed to calculate cluster ram: {}. Default to {} MB",
                error,
                FALLBACK_CLUSTER_RAM_MB
            );
            FALLBACK_CLUSTER_RAM_MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CbError;

    #[test]
    fn test_quota_is_three_quarters() {
        assert_eq!(cluster_ram_quota_mb(Ok(4000)), 3000);
        assert_eq!(cluster_ram_quota_mb(Ok(3768)), 2826);
    }

    #[test]
    fn test_quota_falls_back_on_read_failure() {
        let failed = Err(CbError::Host("free -m exited with 1".to_string()));
        assert_eq!(cluster_ram_quota_mb(failed), FALLBACK_CLUSTER_RAM_MB);
    }
}
