//! etcd v3 backend.
//!
//! etcd v3 has no directories, so a directory is a marker key at `path` and
//! its children live under `path/`. TTLs are leases granted per write.

use super::{CoordinationStore, CreateOutcome, DirSnapshot, child_prefix};
use crate::{CbError, Result};
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp};
use std::time::Duration;

const DIR_MARKER_VALUE: &str = "";

#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    pub async fn new(endpoints: &[String]) -> Result<Self> {
        tracing::info!("Connecting to etcd endpoints: {:?}", endpoints);
        let client = Client::connect(endpoints, None).await?;
        Ok(Self { client })
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<i64> {
        let ttl_secs = i64::try_from(ttl.as_secs().max(1))
            .map_err(|_| CbError::Registry(format!("ttl out of range: {:?}", ttl)))?;
        let mut client = self.client.clone();
        let lease = client.lease_grant(ttl_secs, None).await?;
        Ok(lease.id())
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn create_dir_if_absent(&self, path: &str) -> Result<CreateOutcome> {
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, DIR_MARKER_VALUE, None)]);

        let mut client = self.client.clone();
        let response = client.txn(txn).await?;

        if response.succeeded() {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn get_dir(&self, path: &str) -> Result<Option<DirSnapshot>> {
        let mut client = self.client.clone();

        let marker = client.get(path, None).await?;
        if marker.kvs().is_empty() {
            return Ok(None);
        }

        let prefix = child_prefix(path);
        let response = client
            .get(prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut children = Vec::with_capacity(response.kvs().len());
        for kv in response.kvs() {
            children.push(kv.key_str()?.to_string());
        }

        Ok(Some(DirSnapshot { children }))
    }

    async fn get_value(&self, path: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let response = client.get(path, None).await?;

        match response.kvs().first() {
            Some(kv) => Ok(Some(kv.value_str()?.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let options = match ttl {
            Some(ttl) => Some(PutOptions::new().with_lease(self.grant_lease(ttl).await?)),
            None => None,
        };

        let mut client = self.client.clone();
        client.put(path, value, options).await?;
        Ok(())
    }

    async fn refresh_dir_ttl(&self, path: &str, ttl: Duration) -> Result<()> {
        let lease = self.grant_lease(ttl).await?;
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Greater, 0)])
            .and_then(vec![TxnOp::put(
                path,
                DIR_MARKER_VALUE,
                Some(PutOptions::new().with_lease(lease)),
            )]);

        let mut client = self.client.clone();
        let response = client.txn(txn).await?;

        if !response.succeeded() {
            return Err(CbError::Registry(format!("directory {} not found", path)));
        }

        Ok(())
    }
}
