//! Coordinator configuration

use crate::error::{CoordinatorError, Result};
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for heartbeats whose reporting node disagrees with the
/// registry's recorded owner. The registry binding stays authoritative
/// either way; the policy only decides what happens to the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OwnerMismatchPolicy {
    /// Log both sides and discard the report
    #[default]
    Ignore,
    /// Log both sides and tell the reporting node to drop its maintainer
    RemoveReporter,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator epoch, carried in bootstrap requests
    pub version: i64,

    /// This coordinator's node identifier
    pub node_id: NodeId,

    /// Maximum operators submitted or commands sent per tick
    pub batch_size: usize,

    /// Minimum interval between balance passes
    pub balance_interval: Duration,

    /// Interval before an unacked command is re-sent
    pub resend_interval: Duration,

    /// Policy for owner/heartbeat-source mismatches
    pub owner_mismatch_policy: OwnerMismatchPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            node_id: "coordinator".to_string(),
            batch_size: 64,
            balance_interval: Duration::from_secs(60),
            resend_interval: Duration::from_millis(500),
            owner_mismatch_policy: OwnerMismatchPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a config with the given node id
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Set the coordinator version
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    /// Set the scheduling batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the balance interval
    pub fn with_balance_interval(mut self, interval: Duration) -> Self {
        self.balance_interval = interval;
        self
    }

    /// Set the owner-mismatch policy
    pub fn with_owner_mismatch_policy(mut self, policy: OwnerMismatchPolicy) -> Self {
        self.owner_mismatch_policy = policy;
        self
    }

    /// Validate configuration bounds
    pub fn validate(&self) -> Result<()> {
        if self.node_id.is_empty() {
            return Err(CoordinatorError::InvalidConfig("node_id is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.balance_interval < Duration::from_secs(1) {
            return Err(CoordinatorError::InvalidConfig(
                "balance_interval must be at least 1s".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CoordinatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_bounds() {
        let cfg = CoordinatorConfig::new("c1").with_batch_size(0);
        assert!(cfg.validate().is_err());

        let cfg = CoordinatorConfig::new("c1").with_balance_interval(Duration::from_millis(100));
        assert!(cfg.validate().is_err());

        let cfg = CoordinatorConfig::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = CoordinatorConfig::new("c1")
            .with_version(7)
            .with_batch_size(8)
            .with_owner_mismatch_policy(OwnerMismatchPolicy::RemoveReporter);
        assert_eq!(cfg.version, 7);
        assert_eq!(cfg.batch_size, 8);
        assert_eq!(
            cfg.owner_mismatch_policy,
            OwnerMismatchPolicy::RemoveReporter
        );
    }
}
