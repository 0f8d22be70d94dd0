use crate::{CbError, Result};

pub const DEFAULT_ADMIN_PORT: u16 = 8091;
pub const DEFAULT_BUCKET_RAM_MB: u32 = 128;
pub const DEFAULT_BUCKET_REPLICA_NUMBER: u32 = 1;
pub const DEFAULT_BUCKET_PROXY_PORT: u16 = 11215;

/// Cluster admin identity. Loaded from the coordination store as
/// `username:password`.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The identity a fresh server accepts before `/settings/web` is called.
    pub fn factory_default() -> Self {
        Self::new("admin", "password")
    }

    /// Parse a `username:password` entry. The password may itself contain
    /// `:`; only the first separator splits.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let Some((username, password)) = raw.split_once(':') else {
            return Err(CbError::InvalidCredentials(
                "expected username:password".to_string(),
            ));
        };

        if username.is_empty() {
            return Err(CbError::InvalidCredentials(
                "username cannot be empty".to_string(),
            ));
        }

        Ok(Self::new(username, password))
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BucketDefaults {
    pub ram_quota_mb: u32,
    pub replica_number: u32,
    pub proxy_port: u16,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            ram_quota_mb: DEFAULT_BUCKET_RAM_MB,
            replica_number: DEFAULT_BUCKET_REPLICA_NUMBER,
            proxy_port: DEFAULT_BUCKET_PROXY_PORT,
        }
    }
}

/// Local node settings. Owned by the bootstrap state machine, which fills in
/// `version` and `credentials` as it discovers them.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    address: String,
    pub admin_port: u16,
    pub version: Option<String>,
    pub credentials: Option<AdminCredentials>,
    pub bucket: BucketDefaults,
}

impl NodeConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into().trim().to_string(),
            admin_port: DEFAULT_ADMIN_PORT,
            version: None,
            credentials: None,
            bucket: BucketDefaults::default(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn admin_url(&self, path: &str) -> String {
        admin_url(&self.address, self.admin_port, path)
    }
}

pub fn admin_url(host: &str, port: u16, path: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{}]:{}{}", host, port, path)
    } else {
        format!("http://{}:{}{}", host, port, path)
    }
}

/// Host part of a `host:port` hostname as reported by the cluster. IPv6
/// hosts come back without their brackets.
pub fn hostname_host(hostname: &str) -> &str {
    if let Some(rest) = hostname.strip_prefix('[') {
        return rest.split_once(']').map_or(rest, |(host, _)| host);
    }

    match hostname.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => hostname,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let creds = AdminCredentials::parse("Administrator:pa:ss\n").unwrap();
        assert_eq!(creds.username, "Administrator");
        assert_eq!(creds.password, "pa:ss");
    }

    #[test]
    fn test_parse_credentials_requires_separator() {
        assert!(matches!(
            AdminCredentials::parse("justauser"),
            Err(CbError::InvalidCredentials(_))
        ));
        assert!(AdminCredentials::parse(":secret").is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = AdminCredentials::new("admin", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }

    #[test]
    fn test_hostname_host() {
        assert_eq!(hostname_host("10.231.192.180:8091"), "10.231.192.180");
        assert_eq!(hostname_host("10.231.192.180"), "10.231.192.180");
        assert_eq!(hostname_host("[::1]:8091"), "::1");
        assert_eq!(hostname_host("[fe80::1]"), "fe80::1");
        assert_eq!(hostname_host("fe80::1"), "fe80::1");
    }

    #[test]
    fn test_admin_url() {
        let mut node = NodeConfig::new(" 10.0.0.2 ");
        node.admin_port = 9000;
        assert_eq!(node.admin_url("/pools"), "http://10.0.0.2:9000/pools");
        assert_eq!(admin_url("::1", 8091, "/pools"), "http://[::1]:8091/pools");
    }
}
