//! Shared types for the MariaDB CRD

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a key inside a Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// Kubernetes-style status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

// ============================================================================
// Replication
// ============================================================================

/// Asynchronous primary/replica replication
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationConfig {
    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub replica: ReplicaConfig,

    /// Flush the binary log to disk on every commit
    #[serde(default = "default_true")]
    pub sync_binlog: bool,
}

/// Which member acts as primary and whether it may be replaced automatically
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryConfig {
    /// Pinned primary member index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_index: Option<i32>,

    #[serde(default = "default_true")]
    pub automatic_failover: bool,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            pod_index: None,
            automatic_failover: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaConfig {
    #[serde(default)]
    pub wait_point: WaitPoint,

    #[serde(default)]
    pub gtid: GtidMode,
}

/// Semi-synchronous replication wait point
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum WaitPoint {
    #[default]
    AfterSync,
    AfterCommit,
}

impl WaitPoint {
    pub fn as_sql(&self) -> &'static str {
        match self {
            WaitPoint::AfterSync => "AFTER_SYNC",
            WaitPoint::AfterCommit => "AFTER_COMMIT",
        }
    }
}

/// GTID position a replica resumes from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum GtidMode {
    #[default]
    CurrentPos,
    Slave,
    ReplicateMasterPos,
    None,
}

impl GtidMode {
    /// Value for `MASTER_USE_GTID`
    pub fn as_sql(&self) -> &'static str {
        match self {
            GtidMode::CurrentPos => "current_pos",
            GtidMode::Slave | GtidMode::ReplicateMasterPos => "slave_pos",
            GtidMode::None => "no",
        }
    }
}

// ============================================================================
// Galera
// ============================================================================

/// Multi-primary synchronous Galera clustering
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraConfig {
    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub recovery: GaleraRecoveryConfig,

    #[serde(default)]
    pub agent: GaleraAgentConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraRecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long to wait for consensus before declaring the cluster degraded
    #[serde(default = "default_cluster_healthy_timeout")]
    pub cluster_healthy_timeout_seconds: u64,

    /// How long a forced bootstrap may take
    #[serde(default = "default_cluster_bootstrap_timeout")]
    pub cluster_bootstrap_timeout_seconds: u64,

    /// Per-member ceiling for reporting a recovery sequence number
    #[serde(default = "default_pod_recovery_timeout")]
    pub pod_recovery_timeout_seconds: u64,

    /// How long a restarted member may remain unsynced
    #[serde(default = "default_pod_sync_timeout")]
    pub pod_sync_timeout_seconds: u64,
}

impl Default for GaleraRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cluster_healthy_timeout_seconds: default_cluster_healthy_timeout(),
            cluster_bootstrap_timeout_seconds: default_cluster_bootstrap_timeout(),
            pod_recovery_timeout_seconds: default_pod_recovery_timeout(),
            pod_sync_timeout_seconds: default_pod_sync_timeout(),
        }
    }
}

impl GaleraRecoveryConfig {
    pub fn cluster_healthy_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_healthy_timeout_seconds)
    }

    pub fn cluster_bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_bootstrap_timeout_seconds)
    }

    pub fn pod_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_recovery_timeout_seconds)
    }

    pub fn pod_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_sync_timeout_seconds)
    }

    /// Upper bound for one Galera pass: a health poll, a full recovery with
    /// every candidate failing its bootstrap once, and a confirming poll.
    pub fn pass_budget(&self, replicas: i32) -> Duration {
        let members = replicas.max(1) as u32;
        let per_member = self
            .pod_recovery_timeout()
            .saturating_add(self.cluster_bootstrap_timeout())
            .saturating_add(self.pod_sync_timeout());
        self.cluster_healthy_timeout()
            .saturating_mul(2)
            .saturating_add(per_member.saturating_mul(members))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraAgentConfig {
    #[serde(default = "default_agent_port")]
    pub port: u16,
}

impl Default for GaleraAgentConfig {
    fn default() -> Self {
        Self {
            port: default_agent_port(),
        }
    }
}

// ============================================================================
// Recovery status
// ============================================================================

/// Phase of an in-flight forced bootstrap
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RecoveryPhase {
    AssessingSequence,
    Bootstrapping,
    RestartingPeers,
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPhase::AssessingSequence => write!(f, "AssessingSequence"),
            RecoveryPhase::Bootstrapping => write!(f, "Bootstrapping"),
            RecoveryPhase::RestartingPeers => write!(f, "RestartingPeers"),
        }
    }
}

/// Bookkeeping for a Galera forced bootstrap. Present only while one is in progress.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraRecoveryStatus {
    pub phase: RecoveryPhase,

    /// Sequence numbers reported by each queryable member, keyed by pod name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sequences: BTreeMap<String, i64>,

    /// Member chosen as bootstrap source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_pod: Option<String>,

    /// Member indices that failed to bootstrap in this recovery
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<i32>,

    pub started_at: String,
}

impl GaleraRecoveryStatus {
    pub fn assessing() -> Self {
        Self {
            phase: RecoveryPhase::AssessingSequence,
            sequences: BTreeMap::new(),
            bootstrap_pod: None,
            excluded: Vec::new(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cluster_healthy_timeout() -> u64 {
    30
}

fn default_cluster_bootstrap_timeout() -> u64 {
    600
}

fn default_pod_recovery_timeout() -> u64 {
    300
}

fn default_pod_sync_timeout() -> u64 {
    300
}

fn default_agent_port() -> u16 {
    5555
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_budget_covers_every_member() {
        let recovery = GaleraRecoveryConfig::default();
        assert_eq!(
            recovery.pass_budget(3),
            Duration::from_secs(30 * 2 + (300 + 600 + 300) * 3)
        );
    }

    #[test]
    fn test_pass_budget_saturates() {
        let recovery = GaleraRecoveryConfig {
            cluster_bootstrap_timeout_seconds: u64::MAX / 2,
            pod_sync_timeout_seconds: u64::MAX,
            ..Default::default()
        };
        assert_eq!(recovery.pass_budget(5), Duration::MAX);
    }
}
