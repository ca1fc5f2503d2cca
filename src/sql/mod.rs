//! Engine Client Set
//!
//! Query connections to individual cluster members. Each reconciliation pass
//! builds its own [`ClientSet`], opens connections lazily per member index and
//! closes them all before the pass ends.

mod client;
mod clientset;
mod gtid;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::crd::{GtidMode, WaitPoint};
use crate::error::{Error, Result};

pub use client::{MySqlClient, MySqlConnector};
pub use clientset::ClientSet;
pub use gtid::GtidPosition;

/// Membership view reported by a Galera member (`wsrep_cluster_status`)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GaleraClusterStatus {
    Primary,
    NonPrimary,
    Disconnected,
}

impl FromStr for GaleraClusterStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Primary" => Ok(GaleraClusterStatus::Primary),
            "Non-Primary" | "NonPrimary" => Ok(GaleraClusterStatus::NonPrimary),
            "Disconnected" => Ok(GaleraClusterStatus::Disconnected),
            other => Err(Error::ConfigError(format!(
                "unknown wsrep_cluster_status {other:?}"
            ))),
        }
    }
}

impl fmt::Display for GaleraClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GaleraClusterStatus::Primary => write!(f, "Primary"),
            GaleraClusterStatus::NonPrimary => write!(f, "Non-Primary"),
            GaleraClusterStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Upstream a replica is currently following
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaSource {
    pub host: String,
    pub io_running: bool,
    pub sql_running: bool,
}

impl ReplicaSource {
    /// Whether the replica follows `host` with both threads running
    pub fn follows(&self, host: &str) -> bool {
        self.host == host && self.io_running && self.sql_running
    }
}

/// Account used to connect to members and to authenticate replicas
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn root(password: impl Into<String>) -> Self {
        Self {
            user: "root".to_string(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settings applied when pointing a member at a primary
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaSettings {
    pub primary_host: String,
    pub primary_port: i32,
    /// `MASTER_USER` and `MASTER_PASSWORD` of the replica
    pub credentials: Credentials,
    pub gtid: GtidMode,
    /// Primary binlog position, used to seed `gtid_slave_pos`
    pub seed_position: Option<String>,
    pub connect_retry_seconds: u32,
}

/// Settings applied when promoting a member to primary
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimarySettings {
    pub wait_point: WaitPoint,
    pub sync_binlog: bool,
}

/// Queries and control operations against a single member
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn galera_cluster_status(&self) -> Result<GaleraClusterStatus>;

    async fn galera_cluster_size(&self) -> Result<i32>;

    /// `wsrep_local_state_comment`, e.g. "Synced" or "Joining"
    async fn galera_local_state(&self) -> Result<String>;

    async fn gtid_position(&self) -> Result<GtidPosition>;

    /// `@@gtid_binlog_pos` of this member
    async fn gtid_binlog_position(&self) -> Result<String>;

    async fn replica_source(&self) -> Result<Option<ReplicaSource>>;

    async fn configure_replica(&self, settings: &ReplicaSettings) -> Result<()>;

    async fn promote(&self, settings: &PrimarySettings) -> Result<()>;

    async fn close(&self);
}

/// Opens a connection to the member at an index
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, index: i32) -> Result<Arc<dyn EngineClient>>;
}

/// Quote a string literal for statements sent over the text protocol
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_status() {
        assert_eq!(
            "Primary".parse::<GaleraClusterStatus>().unwrap(),
            GaleraClusterStatus::Primary
        );
        assert_eq!(
            "Non-Primary".parse::<GaleraClusterStatus>().unwrap(),
            GaleraClusterStatus::NonPrimary
        );
        assert!("Split".parse::<GaleraClusterStatus>().is_err());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("p'ss\\w"), "'p\\'ss\\\\w'");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::root("hunter2"));
        assert!(debug.contains("root"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_replica_follows_requires_running_threads() {
        let source = ReplicaSource {
            host: "mdb-0".to_string(),
            io_running: true,
            sql_running: false,
        };
        assert!(!source.follows("mdb-0"));
    }
}
