use cbnode_core::node::{DEFAULT_ADMIN_PORT, DEFAULT_BUCKET_PROXY_PORT};
use cbnode_core::registry::DEFAULT_NAMESPACE;
use cbnode_core::{BucketDefaults, CbError, CoordinationKeys, NodeConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub local_ip: Option<String>,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub bucket: BucketConfig,
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Registry backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub etcd: EtcdConfig,
}

impl RegistryConfig {
    pub fn namespace_or_default(&self) -> &str {
        self.namespace
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Etcd,
    Memory,
}

impl RegistryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Etcd => "etcd",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    #[serde(default = "default_etcd_endpoints")]
    pub endpoints: Vec<String>,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: default_etcd_endpoints(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    #[serde(default = "default_bucket_ram_mb")]
    pub ram_quota_mb: u32,
    #[serde(default = "default_bucket_replicas")]
    pub replica_number: u32,
    #[serde(default = "default_bucket_proxy_port")]
    pub proxy_port: u16,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            ram_quota_mb: default_bucket_ram_mb(),
            replica_number: default_bucket_replicas(),
            proxy_port: default_bucket_proxy_port(),
        }
    }
}

fn default_admin_port() -> u16 {
    DEFAULT_ADMIN_PORT
}

fn default_heartbeat_ttl_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}

fn default_bucket_ram_mb() -> u32 {
    BucketDefaults::default().ram_quota_mb
}

fn default_bucket_replicas() -> u32 {
    BucketDefaults::default().replica_number
}

fn default_bucket_proxy_port() -> u16 {
    DEFAULT_BUCKET_PROXY_PORT
}

impl Config {
    /// Load `path` if it exists, then overlay `CBNODE__*` environment
    /// variables (e.g. `CBNODE__REGISTRY__BACKEND=memory`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(Path::new(path)).required(false))
            .add_source(
                ::config::Environment::with_prefix("CBNODE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("registry.etcd.endpoints"),
            )
            .build()
            .map_err(|e| CbError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| CbError::Config(e.to_string()))?;

        if config.heartbeat_ttl_secs < 2 {
            return Err(CbError::Config(
                "heartbeat_ttl_secs must be at least 2".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn keys(&self) -> CoordinationKeys {
        CoordinationKeys::for_namespace(self.registry.namespace_or_default())
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn node_config(&self) -> Result<NodeConfig> {
        let local_ip = self
            .local_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| CbError::Config("local_ip is required to start a node".to_string()))?;

        let mut node = NodeConfig::new(local_ip);
        node.admin_port = self.admin_port;
        node.bucket = BucketDefaults {
            ram_quota_mb: self.bucket.ram_quota_mb,
            replica_number: self.bucket.replica_number,
            proxy_port: self.bucket.proxy_port,
        };
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_config() -> Config {
        ::config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = empty_config();
        assert_eq!(cfg.admin_port, 8091);
        assert_eq!(cfg.heartbeat_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.registry.etcd.endpoints, vec!["http://127.0.0.1:2379"]);
        assert_eq!(cfg.keys(), CoordinationKeys::default());
        assert_eq!(cfg.bucket.ram_quota_mb, 128);
    }

    #[test]
    fn test_node_config_requires_local_ip() {
        let mut cfg = empty_config();
        assert!(cfg.node_config().is_err());

        cfg.local_ip = Some("10.0.0.3".to_string());
        cfg.registry.namespace = Some("staging".to_string());
        let node = cfg.node_config().unwrap();
        assert_eq!(node.address(), "10.0.0.3");
        assert_eq!(cfg.keys().membership_dir, "/staging/couchbase-node-state");
    }
}
