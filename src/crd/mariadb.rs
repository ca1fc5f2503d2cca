//! MariaDB Custom Resource Definition
//!
//! The MariaDB CRD describes a replicated database cluster running either
//! asynchronous replication or Galera. Only the fields the HA coordination
//! core reads are modelled here.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, GaleraConfig, GaleraRecoveryStatus, ReplicationConfig, SecretKeySelector};

/// The MariaDB CRD represents a managed database cluster.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mariadb.mmontes.io",
    version = "v1alpha1",
    kind = "MariaDB",
    namespaced,
    status = "MariaDBStatus",
    shortname = "mdb",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].message"}"#,
    printcolumn = r#"{"name":"Primary Pod","type":"string","jsonPath":".status.currentPrimary"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBSpec {
    /// Number of members
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Port the engine listens on
    #[serde(default = "default_port")]
    pub port: i32,

    /// Credentials used by the operator to query members
    #[serde(default = "default_root_password_ref")]
    pub root_password_secret_key_ref: SecretKeySelector,

    /// Asynchronous primary/replica replication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationConfig>,

    /// Galera multi-primary clustering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub galera: Option<GaleraConfig>,
}

fn default_replicas() -> i32 {
    1
}

fn default_port() -> i32 {
    3306
}

fn default_root_password_ref() -> SecretKeySelector {
    SecretKeySelector {
        name: "mariadb".to_string(),
        key: "root-password".to_string(),
    }
}

/// High availability mode, resolved once per pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HaMode<'a> {
    None,
    Replication(&'a ReplicationConfig),
    Galera(&'a GaleraConfig),
}

impl HaMode<'_> {
    pub fn kind(&self) -> HaKind {
        match self {
            HaMode::None => HaKind::None,
            HaMode::Replication(_) => HaKind::Replication,
            HaMode::Galera(_) => HaKind::Galera,
        }
    }
}

/// Mode marker without the configuration payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HaKind {
    None,
    Replication,
    Galera,
}

impl HaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaKind::None => "none",
            HaKind::Replication => "replication",
            HaKind::Galera => "galera",
        }
    }
}

/// Upper bound for any Galera recovery timeout (one day)
pub const MAX_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

impl MariaDBSpec {
    /// Validate the spec
    pub fn validate(&self) -> Result<(), String> {
        if self.replicas < 1 {
            return Err("replicas must be at least 1".to_string());
        }
        if self.port < 1 || self.port > 65535 {
            return Err("port must be between 1 and 65535".to_string());
        }
        if self.root_password_secret_key_ref.name.trim().is_empty()
            || self.root_password_secret_key_ref.key.trim().is_empty()
        {
            return Err("rootPasswordSecretKeyRef name and key must not be empty".to_string());
        }

        match self.ha_mode()? {
            HaMode::None => {}
            HaMode::Replication(repl) => {
                validate_pod_index("replication", repl.primary.pod_index, self.replicas)?;
            }
            HaMode::Galera(galera) => {
                validate_pod_index("galera", galera.primary.pod_index, self.replicas)?;
                let recovery = &galera.recovery;
                let timeouts = [
                    ("clusterHealthyTimeoutSeconds", recovery.cluster_healthy_timeout_seconds),
                    ("clusterBootstrapTimeoutSeconds", recovery.cluster_bootstrap_timeout_seconds),
                    ("podRecoveryTimeoutSeconds", recovery.pod_recovery_timeout_seconds),
                    ("podSyncTimeoutSeconds", recovery.pod_sync_timeout_seconds),
                ];
                for (field, value) in timeouts {
                    if recovery.enabled && value == 0 {
                        return Err(format!("galera.recovery.{field} must be greater than 0"));
                    }
                    if value > MAX_TIMEOUT_SECONDS {
                        return Err(format!(
                            "galera.recovery.{field} must be at most {MAX_TIMEOUT_SECONDS} seconds"
                        ));
                    }
                }
                if galera.agent.port == 0 {
                    return Err("galera.agent.port must be greater than 0".to_string());
                }
            }
        }

        Ok(())
    }

    /// Resolve the HA mode. Both modes at once is a configuration error.
    pub fn ha_mode(&self) -> Result<HaMode<'_>, String> {
        match (&self.replication, &self.galera) {
            (Some(_), Some(_)) => {
                Err("replication and galera are mutually exclusive".to_string())
            }
            (Some(repl), None) => Ok(HaMode::Replication(repl)),
            (None, Some(galera)) => Ok(HaMode::Galera(galera)),
            (None, None) => Ok(HaMode::None),
        }
    }
}

fn validate_pod_index(mode: &str, pod_index: Option<i32>, replicas: i32) -> Result<(), String> {
    match pod_index {
        Some(index) if index < 0 || index >= replicas => Err(format!(
            "{mode}.primary.podIndex {index} is out of range for {replicas} replicas"
        )),
        _ => Ok(()),
    }
}

impl MariaDB {
    /// Name of the member pod at `index`
    pub fn pod_name(&self, index: i32) -> String {
        format!("{}-{}", self.name_any(), index)
    }

    /// Stable per-index network identity of a member
    pub fn member_endpoint(&self, index: i32) -> String {
        format!(
            "{}.{}-internal.{}.svc.cluster.local",
            self.pod_name(index),
            self.name_any(),
            self.namespace().unwrap_or_else(|| "default".to_string())
        )
    }

    /// Service that routes traffic to the current primary
    pub fn primary_service_name(&self) -> String {
        format!("{}-primary", self.name_any())
    }
}

/// Status subresource for MariaDB
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_primary_pod_index: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_primary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub galera_recovery: Option<GaleraRecoveryStatus>,
}

impl MariaDBStatus {
    /// Record the current primary. The name is derived from the index.
    pub fn update_current_primary(&mut self, mariadb: &MariaDB, index: i32) {
        self.current_primary_pod_index = Some(index);
        self.current_primary = Some(mariadb.pod_name(index));
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_).map(|c| c.status == "True").unwrap_or(false)
    }

    pub fn is_condition_false(&self, type_: &str) -> bool {
        self.condition(type_).map(|c| c.status == "False").unwrap_or(false)
    }
}
