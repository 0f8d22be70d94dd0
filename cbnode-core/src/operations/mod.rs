pub mod init_cluster;
pub mod join_cluster;
pub mod wait_cluster;

pub use init_cluster::{
    DEFAULT_BUCKET_NAME, FALLBACK_CLUSTER_RAM_MB, InitClusterOperation,
    InitClusterOperationResult, cluster_ram_quota_mb,
};
pub use join_cluster::{JoinClusterOperation, JoinClusterOperationResult};
pub use wait_cluster::WaitClusterOperation;
