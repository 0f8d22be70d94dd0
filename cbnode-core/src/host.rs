//! Local OS collaborator: data directories, the database service, and host
//! memory.

use crate::{CbError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

#[async_trait]
pub trait HostOs: Send + Sync {
    async fn prepare_data_directories(&self) -> Result<()>;

    /// Ask the init system to start the service. Does not wait for it.
    async fn start_service(&self) -> Result<()>;

    async fn service_running(&self) -> Result<bool>;

    async fn total_memory_mb(&self) -> Result<u64>;
}

pub type DynHost = Arc<dyn HostOs>;

#[derive(Debug, Clone)]
pub struct SystemHost {
    pub var_dir: PathBuf,
    pub service_name: String,
    pub owner: String,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self {
            var_dir: PathBuf::from("/opt/couchbase/var"),
            service_name: "couchbase-server".to_string(),
            owner: "couchbase:couchbase".to_string(),
        }
    }
}

const DATA_SUBDIRS: &[&str] = &[
    "lib/couchbase",
    "lib/couchbase/config",
    "lib/couchbase/data",
    "lib/couchbase/stats",
    "lib/couchbase/logs",
    "lib/moxi",
];

#[async_trait]
impl HostOs for SystemHost {
    /// The server refuses to start unless these exist, which matters when
    /// the var directory is an initially empty volume.
    async fn prepare_data_directories(&self) -> Result<()> {
        for subdir in DATA_SUBDIRS {
            tokio::fs::create_dir_all(self.var_dir.join(subdir)).await?;
        }

        let output = Command::new("chown")
            .arg("-R")
            .arg(&self.owner)
            .arg(&self.var_dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(CbError::Host(format!(
                "chown {} failed: {}",
                self.var_dir.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!("Prepared data directories under {}", self.var_dir.display());
        Ok(())
    }

    async fn start_service(&self) -> Result<()> {
        let status = Command::new("service")
            .arg(&self.service_name)
            .arg("start")
            .status()
            .await?;

        if !status.success() {
            return Err(CbError::Host(format!(
                "service {} start exited with {}",
                self.service_name, status
            )));
        }

        Ok(())
    }

    /// A non-zero exit from `service ... status` means "not running".
    async fn service_running(&self) -> Result<bool> {
        let output = Command::new("service")
            .arg(&self.service_name)
            .arg("status")
            .output()
            .await?;

        if !output.status.success() {
            return Ok(false);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!("Service status output: {}", stdout.trim());
        Ok(stdout.contains("is running"))
    }

    async fn total_memory_mb(&self) -> Result<u64> {
        let output = Command::new("free").arg("-m").output().await?;
        if !output.status.success() {
            return Err(CbError::Host(format!("free -m exited with {}", output.status)));
        }

        parse_free_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Total from the `Mem:` row of `free -m` output.
pub fn parse_free_output(output: &str) -> Result<u64> {
    let row = output
        .lines()
        .find_map(|line| line.trim_start().strip_prefix("Mem:"))
        .ok_or_else(|| CbError::Host(format!("could not find Mem row in: {}", output)))?;

    let total = row
        .split_whitespace()
        .next()
        .ok_or_else(|| CbError::Host(format!("Mem row has no total: {}", row)))?;

    total
        .parse()
        .map_err(|error| CbError::Host(format!("invalid Mem total {:?}: {}", total, error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_free_output() {
        let output = "             total       used       free     shared    buffers     cached\n\
                      Mem:          3768       2601       1166          0          4       1877\n\
                      -/+ buffers/cache:        720       3048\n\
                      Swap:            0          0          0\n";
        assert_eq!(parse_free_output(output).unwrap(), 3768);
    }

    #[test]
    fn test_parse_free_output_rejects_garbage() {
        assert!(parse_free_output("command not found").is_err());
        assert!(parse_free_output("Mem:   lots").is_err());
    }
}
