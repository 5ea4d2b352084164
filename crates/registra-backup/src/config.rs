//! Backup engine configuration.

use crate::retention::RetentionPolicy;
use crate::scheduler::Frequency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory holding archive files and the catalog index
    pub backup_dir: PathBuf,
    /// Ordered collection names included in every snapshot, fixed per
    /// deployment
    pub collections: Vec<String>,
    /// Retention policy applied after each backup and on explicit cleanup
    pub retention: RetentionPolicy,
    /// Cadence the scheduler starts with
    pub schedule: Frequency,
    /// Scheduler poll interval in seconds
    pub poll_interval_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            collections: vec![
                "users".to_string(),
                "students".to_string(),
                "staff".to_string(),
                "courses".to_string(),
                "files".to_string(),
                "reports".to_string(),
            ],
            retention: RetentionPolicy::default(),
            schedule: Frequency::Daily,
            poll_interval_secs: 60,
        }
    }
}

impl BackupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_deployment_collections() {
        let config = BackupConfig::default();
        assert_eq!(config.collections.len(), 6);
        assert_eq!(config.schedule, Frequency::Daily);
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: BackupConfig =
            serde_json::from_str(r#"{"backup_dir": "/var/lib/registra/backups"}"#).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/var/lib/registra/backups"));
        assert_eq!(config.collections.len(), 6);
    }
}
