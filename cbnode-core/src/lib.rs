//! cbnode Core - bootstrap agent for Couchbase cluster members
//!
//! Nodes never talk to each other directly. They coordinate through a
//! strongly-consistent store (etcd):
//! - the first node to create the membership directory initializes the cluster
//! - every other node finds a live peer there, joins it and rebalances
//! - every node keeps a TTL entry alive in the directory

pub mod bootstrap;
pub mod error;
pub mod gateway;
pub mod health;
pub mod host;
pub mod membership;
pub mod node;
pub mod operations;
pub mod registry;
pub mod retry;

pub use bootstrap::{Bootstrap, BootstrapPhase};
pub use error::{CbError, Result};
pub use gateway::{AuthMode, ClusterGateway, DEFAULT_REQUEST_TIMEOUT};
pub use health::{ClusterNodeStatus, HealthMonitor};
pub use host::{DynHost, HostOs, SystemHost, parse_free_output};
pub use membership::{DEFAULT_HEARTBEAT_TTL, MembershipCoordinator, first_live_peer};
pub use node::{AdminCredentials, BucketDefaults, NodeConfig};
pub use operations::{
    InitClusterOperation, InitClusterOperationResult, JoinClusterOperation,
    JoinClusterOperationResult, WaitClusterOperation, cluster_ram_quota_mb,
};
pub use registry::etcd::EtcdStore;
pub use registry::factory::RegistryBuilder;
pub use registry::memory::MemoryStore;
pub use registry::{
    CoordinationKeys, CoordinationStore, CreateOutcome, DirSnapshot, DynStore,
};
pub use retry::{Backoff, RetryPolicy, retry_loop};
