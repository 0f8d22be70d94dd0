//! Process-local store with the same create-if-absent and TTL semantics as
//! the etcd backend. Expired keys are dropped lazily on access, and children
//! disappear together with their directory.

use super::{CoordinationStore, CreateOutcome, DirSnapshot, child_prefix};
use crate::{CbError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    is_dir: bool,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Entry>) -> R) -> Result<R> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CbError::Registry("memory store lock poisoned".to_string()))?;

        let now = Instant::now();
        let expired_dirs: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_dir && entry.expired(now))
            .map(|(key, _)| child_prefix(key))
            .collect();
        entries.retain(|key, entry| {
            !entry.expired(now) && !expired_dirs.iter().any(|prefix| key.starts_with(prefix))
        });

        Ok(f(&mut entries))
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create_dir_if_absent(&self, path: &str) -> Result<CreateOutcome> {
        self.with_entries(|entries| {
            if entries.contains_key(path) {
                return CreateOutcome::AlreadyExists;
            }

            entries.insert(
                path.to_string(),
                Entry {
                    value: String::new(),
                    is_dir: true,
                    expires_at: None,
                },
            );
            CreateOutcome::Created
        })
    }

    async fn get_dir(&self, path: &str) -> Result<Option<DirSnapshot>> {
        self.with_entries(|entries| {
            match entries.get(path) {
                Some(entry) if entry.is_dir => {}
                _ => return None,
            }

            let prefix = child_prefix(path);
            let children = entries
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect();

            Some(DirSnapshot { children })
        })
    }

    async fn get_value(&self, path: &str) -> Result<Option<String>> {
        self.with_entries(|entries| {
            entries
                .get(path)
                .filter(|entry| !entry.is_dir)
                .map(|entry| entry.value.clone())
        })
    }

    async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(
                path.to_string(),
                Entry {
                    value: value.to_string(),
                    is_dir: false,
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        })
    }

    async fn refresh_dir_ttl(&self, path: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries| match entries.get_mut(path) {
            Some(entry) if entry.is_dir => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(())
            }
            _ => Err(CbError::Registry(format!("directory {} not found", path))),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const DIR: &str = "/couchbase.com/couchbase-node-state";

    #[tokio::test]
    async fn test_create_dir_once() {
        let store = MemoryStore::new();
        assert_eq!(
            store.create_dir_if_absent(DIR).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_dir_if_absent(DIR).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_dir_lists_children() {
        let store = MemoryStore::new();
        assert!(store.get_dir(DIR).await.unwrap().is_none());

        store.create_dir_if_absent(DIR).await.unwrap();
        assert_eq!(store.get_dir(DIR).await.unwrap(), Some(DirSnapshot::default()));

        let child = format!("{}/10.0.0.1", DIR);
        store.set(&child, "up", None).await.unwrap();
        store.set("/couchbase.com/userpass", "a:b", None).await.unwrap();

        let snapshot = store.get_dir(DIR).await.unwrap().unwrap();
        assert_eq!(snapshot.children, vec![child]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_drops_dir_and_children() {
        let store = MemoryStore::new();
        store.create_dir_if_absent(DIR).await.unwrap();
        store
            .set(&format!("{}/10.0.0.1", DIR), "up", None)
            .await
            .unwrap();
        assert_ok!(store.refresh_dir_ttl(DIR, Duration::from_secs(10)).await);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(store.get_dir(DIR).await.unwrap().is_none());
        assert_eq!(
            store.create_dir_if_absent(DIR).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(store.get_dir(DIR).await.unwrap(), Some(DirSnapshot::default()));
    }

    #[tokio::test]
    async fn test_refresh_missing_dir_fails() {
        let store = MemoryStore::new();
        assert_err!(store.refresh_dir_ttl(DIR, Duration::from_secs(10)).await);
    }
}
