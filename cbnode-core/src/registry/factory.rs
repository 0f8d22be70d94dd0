use super::{DynStore, etcd::EtcdStore, memory::MemoryStore};
use crate::{CbError, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    backend: Option<String>,
    etcd_endpoints: Option<Vec<String>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn etcd_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.etcd_endpoints = Some(endpoints);
        self
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(CbError::Config(
                "registry backend cannot be empty".to_string(),
            ));
        }

        Ok(backend)
    }

    /// Connect the store client. Called once per process; the returned
    /// handle is shared by every component that touches the store.
    pub async fn build(&self) -> Result<DynStore> {
        let backend = self.resolve_backend()?;

        match backend.as_str() {
            "etcd" => {
                let endpoints: Vec<String> = self
                    .etcd_endpoints
                    .clone()
                    .ok_or_else(|| {
                        CbError::Config("etcd endpoints are required for etcd backend".to_string())
                    })?
                    .into_iter()
                    .map(|endpoint| endpoint.trim().to_string())
                    .filter(|endpoint| !endpoint.is_empty())
                    .collect();

                if endpoints.is_empty() {
                    return Err(CbError::Config(
                        "etcd endpoints cannot be empty for etcd backend".to_string(),
                    ));
                }

                let store = EtcdStore::new(&endpoints).await?;
                Ok(Arc::new(store))
            }
            "memory" => {
                tracing::warn!("Using in-process memory registry; agents on other hosts cannot see it");
                Ok(Arc::new(MemoryStore::new()))
            }
            other => Err(CbError::Config(format!(
                "unsupported registry backend: {}",
                other
            ))),
        }
    }
}
