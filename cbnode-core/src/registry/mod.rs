//! Coordination store abstraction.
//!
//! The agent only needs a handful of primitives from the store: atomic
//! directory creation, directory listing, plain reads, TTL-bearing writes and
//! a TTL refresh on an existing directory.

pub mod etcd;
pub mod factory;
pub mod memory;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NAMESPACE: &str = "couchbase.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Children of a directory at the time it was read, as full keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    pub children: Vec<String>,
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `path` as a directory without TTL. At most one concurrent
    /// caller observes `Created`.
    async fn create_dir_if_absent(&self, path: &str) -> Result<CreateOutcome>;

    /// `None` when the directory does not exist.
    async fn get_dir(&self, path: &str) -> Result<Option<DirSnapshot>>;

    async fn get_value(&self, path: &str) -> Result<Option<String>>;

    /// Write `value` at `path`; `ttl == None` means the key never expires.
    async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Give an existing directory a new TTL. Fails if the directory is gone.
    async fn refresh_dir_ttl(&self, path: &str, ttl: Duration) -> Result<()>;
}

pub type DynStore = Arc<dyn CoordinationStore>;

/// Fixed key layout shared by every agent of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationKeys {
    pub membership_dir: String,
    pub credentials: String,
}

impl CoordinationKeys {
    pub fn for_namespace(namespace: &str) -> Self {
        let namespace = namespace.trim().trim_matches('/');
        Self {
            membership_dir: format!("/{}/couchbase-node-state", namespace),
            credentials: format!("/{}/userpass", namespace),
        }
    }

    pub fn member_key(&self, address: &str) -> String {
        format!("{}/{}", self.membership_dir, address)
    }
}

impl Default for CoordinationKeys {
    fn default() -> Self {
        Self::for_namespace(DEFAULT_NAMESPACE)
    }
}

pub(crate) fn child_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}
