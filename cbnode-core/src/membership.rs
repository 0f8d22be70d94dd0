//! First-node election and liveness publication through the coordination
//! store.

use crate::registry::{CoordinationKeys, CreateOutcome, DynStore};
use crate::{AdminCredentials, CbError, Result, RetryPolicy};
use std::convert::Infallible;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(10);

const LIVENESS_VALUE: &str = "up";
const CREDENTIALS_POLICY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(10));

#[derive(Clone)]
pub struct MembershipCoordinator {
    store: DynStore,
    keys: CoordinationKeys,
    address: String,
}

impl MembershipCoordinator {
    pub fn new(store: DynStore, keys: CoordinationKeys, address: impl Into<String>) -> Self {
        Self {
            store,
            keys,
            address: address.into(),
        }
    }

    pub fn keys(&self) -> &CoordinationKeys {
        &self.keys
    }

    /// Try to create the membership directory. `true` means this node is the
    /// first node; losing the race is not an error.
    pub async fn attempt_election(&self) -> Result<bool> {
        let dir = &self.keys.membership_dir;
        tracing::info!("Attempting to become first cluster node via {}", dir);

        match self.store.create_dir_if_absent(dir).await? {
            CreateOutcome::Created => {
                tracing::info!("Created key: {}", dir);
                Ok(true)
            }
            CreateOutcome::AlreadyExists => {
                tracing::info!("Key {} already exists", dir);
                Ok(false)
            }
        }
    }

    /// Some live peer from the membership directory, or `None` when the
    /// directory is absent or empty.
    pub async fn find_live_peer(&self) -> Result<Option<String>> {
        let snapshot = self.store.get_dir(&self.keys.membership_dir).await?;

        let Some(snapshot) = snapshot else {
            tracing::info!("Membership directory is absent");
            return Ok(None);
        };

        let peer = first_live_peer(&snapshot.children);
        tracing::info!("Live peer from {:?}: {:?}", snapshot.children, peer);
        Ok(peer)
    }

    /// Refresh the directory TTL and this node's own entry. Failures are
    /// logged and reported to the caller; they never abort anything.
    pub async fn publish_liveness(&self, ttl: Duration) -> bool {
        let dir = &self.keys.membership_dir;
        if let Err(error) = self.refresh_membership_dir(ttl).await {
            tracing::warn!(
                "Error updating {} dir with new TTL, ignoring but this could cause problems: {}",
                dir,
                error
            );
        }

        let key = self.keys.member_key(&self.address);
        match self.store.set(&key, LIVENESS_VALUE, Some(ttl)).await {
            Ok(()) => {
                tracing::debug!("Published node state to {}", key);
                true
            }
            Err(error) => {
                tracing::warn!(
                    "Error publishing node state to {}: {}. Other nodes cannot join through this node until it is resolved",
                    key,
                    error
                );
                false
            }
        }
    }

    /// A live member recreates the directory if it lapsed, so it only
    /// disappears once every member has gone silent.
    async fn refresh_membership_dir(&self, ttl: Duration) -> Result<()> {
        let dir = &self.keys.membership_dir;
        if self.store.refresh_dir_ttl(dir, ttl).await.is_ok() {
            return Ok(());
        }

        if self.store.create_dir_if_absent(dir).await? == CreateOutcome::Created {
            tracing::warn!("Membership directory {} had expired, recreated it", dir);
        }
        self.store.refresh_dir_ttl(dir, ttl).await
    }

    /// Publish liveness every `ttl / 2`. Never returns.
    pub async fn run_heartbeat_loop(&self, ttl: Duration) -> Infallible {
        tracing::info!(
            "Entering heartbeat loop for {} with ttl {:?}",
            self.address,
            ttl
        );

        let interval = ttl / 2;
        let mut failing = false;

        loop {
            let published = self.publish_liveness(ttl).await;
            if published && failing {
                tracing::info!("Published node state again, the previous error seems to have fixed itself");
            }
            failing = !published;

            tokio::time::sleep(interval).await;
        }
    }

    /// Read the `username:password` entry, retrying while the store is
    /// unreachable or the entry has not been provisioned yet.
    pub async fn load_admin_credentials(&self) -> Result<AdminCredentials> {
        let key = self.keys.credentials.as_str();
        let store = self.store.as_ref();

        let raw = CREDENTIALS_POLICY
            .run("load admin credentials", move || async move {
                match store.get_value(key).await {
                    Ok(Some(raw)) => Ok(Some(raw)),
                    Ok(None) => {
                        tracing::info!("Admin credentials not found at {}, retrying", key);
                        Ok(None)
                    }
                    Err(error) => {
                        tracing::warn!("Error getting key {}: {}, retrying", key, error);
                        Ok(None)
                    }
                }
            })
            .await?;

        AdminCredentials::parse(&raw).map_err(|error| match error {
            CbError::InvalidCredentials(reason) => {
                CbError::InvalidCredentials(format!("{} at {}", reason, key))
            }
            other => other,
        })
    }
}

/// Take the first child and strip it down to its last path segment. Does not
/// try to pick the best peer.
pub fn first_live_peer(children: &[String]) -> Option<String> {
    children
        .iter()
        .filter_map(|child| child.rsplit('/').next())
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::memory::MemoryStore;
    use crate::registry::{CoordinationStore, DirSnapshot};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn coordinator(store: &Arc<MemoryStore>, address: &str) -> MembershipCoordinator {
        MembershipCoordinator::new(store.clone(), CoordinationKeys::default(), address)
    }

    #[test]
    fn test_first_live_peer() {
        assert_eq!(first_live_peer(&[]), None);
        assert_eq!(
            first_live_peer(&[
                "/couchbase.com/couchbase-node-state/10.0.0.7".to_string(),
                "/couchbase.com/couchbase-node-state/10.0.0.8".to_string(),
            ]),
            Some("10.0.0.7".to_string())
        );
    }

    #[tokio::test]
    async fn test_single_winner_among_concurrent_elections() {
        let store = Arc::new(MemoryStore::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let node = coordinator(&store, &format!("10.0.0.{}", i));
            handles.push(tokio::spawn(async move { node.attempt_election().await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_find_live_peer_absent_or_empty() {
        let store = Arc::new(MemoryStore::new());
        let node = coordinator(&store, "10.0.0.1");

        assert_eq!(node.find_live_peer().await.unwrap(), None);
        assert!(node.attempt_election().await.unwrap());
        assert_eq!(node.find_live_peer().await.unwrap(), None);

        node.publish_liveness(DEFAULT_HEARTBEAT_TTL).await;
        assert_eq!(
            node.find_live_peer().await.unwrap(),
            Some("10.0.0.1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_keeps_entry_alive() {
        let store = Arc::new(MemoryStore::new());
        let node = coordinator(&store, "10.0.0.1");
        node.attempt_election().await.unwrap();

        let ttl = Duration::from_secs(10);
        let heartbeat = node.clone();
        let handle = tokio::spawn(async move { heartbeat.run_heartbeat_loop(ttl).await });

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        assert_eq!(
            node.find_live_peer().await.unwrap(),
            Some("10.0.0.1".to_string())
        );

        handle.abort();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.get_dir(&node.keys().membership_dir).await.unwrap().is_none());
        assert!(node.attempt_election().await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_creates_missing_directory() {
        let store = Arc::new(MemoryStore::new());
        let node = coordinator(&store, "10.0.0.1");

        assert!(node.publish_liveness(DEFAULT_HEARTBEAT_TTL).await);
        assert_eq!(
            store
                .get_value("/couchbase.com/couchbase-node-state/10.0.0.1")
                .await
                .unwrap(),
            Some("up".to_string())
        );
        assert_eq!(
            node.find_live_peer().await.unwrap(),
            Some("10.0.0.1".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_heals_lapsed_directory() {
        let store = Arc::new(MemoryStore::new());
        let first = coordinator(&store, "10.0.0.1");
        assert!(first.attempt_election().await.unwrap());
        assert!(first.publish_liveness(DEFAULT_HEARTBEAT_TTL).await);

        // One stalled tick lets the directory expire.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get_dir(&first.keys().membership_dir).await.unwrap().is_none());

        assert!(first.publish_liveness(DEFAULT_HEARTBEAT_TTL).await);
        assert_eq!(
            first.find_live_peer().await.unwrap(),
            Some("10.0.0.1".to_string())
        );

        let newcomer = coordinator(&store, "10.0.0.2");
        assert!(!newcomer.attempt_election().await.unwrap());

        // The recreated directory carries a TTL again.
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.get_dir(&first.keys().membership_dir).await.unwrap().is_none());
    }

    /// Fails every call while `down` is set.
    struct FlakyStore {
        inner: MemoryStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(CbError::Registry("store unreachable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CoordinationStore for FlakyStore {
        async fn create_dir_if_absent(&self, path: &str) -> Result<CreateOutcome> {
            self.check()?;
            self.inner.create_dir_if_absent(path).await
        }

        async fn get_dir(&self, path: &str) -> Result<Option<DirSnapshot>> {
            self.check()?;
            self.inner.get_dir(path).await
        }

        async fn get_value(&self, path: &str) -> Result<Option<String>> {
            self.check()?;
            self.inner.get_value(path).await
        }

        async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
            self.check()?;
            self.inner.set(path, value, ttl).await
        }

        async fn refresh_dir_ttl(&self, path: &str, ttl: Duration) -> Result<()> {
            self.check()?;
            self.inner.refresh_dir_ttl(path, ttl).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_recovers_after_store_outage() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        });
        let node = MembershipCoordinator::new(store.clone(), CoordinationKeys::default(), "10.0.0.1");
        assert!(node.attempt_election().await.unwrap());

        let ttl = Duration::from_secs(10);
        let heartbeat = node.clone();
        let handle = tokio::spawn(async move { heartbeat.run_heartbeat_loop(ttl).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        store.down.store(true, Ordering::SeqCst);

        // Ticks at 5s and 10s fail; the entry and the directory expire.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!handle.is_finished());
        store.down.store(false, Ordering::SeqCst);
        assert_eq!(node.find_live_peer().await.unwrap(), None);

        // The tick at 15s publishes again and restores the directory.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!handle.is_finished());
        assert_eq!(
            node.find_live_peer().await.unwrap(),
            Some("10.0.0.1".to_string())
        );

        handle.abort();
    }

    #[tokio::test]
    async fn test_load_admin_credentials() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("/couchbase.com/userpass", "Administrator:s3cret", None)
            .await
            .unwrap();

        let creds = coordinator(&store, "10.0.0.1")
            .load_admin_credentials()
            .await
            .unwrap();
        assert_eq!(creds, AdminCredentials::new("Administrator", "s3cret"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_admin_credentials_gives_up() {
        let store = Arc::new(MemoryStore::new());
        let result = coordinator(&store, "10.0.0.1").load_admin_credentials().await;
        assert!(matches!(
            result,
            Err(CbError::RetriesExhausted { attempts: 10, .. })
        ));
    }
}
