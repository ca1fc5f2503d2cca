//! Cluster Status Store
//!
//! Versioned record of the coordination decisions for one cluster. Writes are
//! optimistic: a write built on a stale version fails with [`Error::Conflict`]
//! and the pass has to re-read before trying again.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::crd::{MariaDB, MariaDBStatus};
use crate::error::{Error, Result};

/// Identity of a cluster resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl ClusterKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(mariadb: &MariaDB) -> Self {
        Self::new(
            mariadb.namespace().unwrap_or_else(|| "default".to_string()),
            mariadb.name_any(),
        )
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Status together with the version it was read at
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub status: MariaDBStatus,
    pub version: String,
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn read(&self, key: &ClusterKey) -> Result<StatusSnapshot>;

    /// Replace the status read in `base` with `status`, provided nobody else
    /// wrote in between. Returns the snapshot at the new version.
    async fn write_if_version(
        &self,
        key: &ClusterKey,
        base: &StatusSnapshot,
        status: &MariaDBStatus,
    ) -> Result<StatusSnapshot>;
}

/// Read-modify-write helper used by every writer within a pass
pub struct StatusHandle<'a> {
    store: &'a dyn StatusStore,
    key: ClusterKey,
    snapshot: StatusSnapshot,
}

impl<'a> StatusHandle<'a> {
    pub async fn load(store: &'a dyn StatusStore, key: ClusterKey) -> Result<StatusHandle<'a>> {
        let snapshot = store.read(&key).await?;
        Ok(Self {
            store,
            key,
            snapshot,
        })
    }

    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    pub fn status(&self) -> &MariaDBStatus {
        &self.snapshot.status
    }

    pub fn version(&self) -> &str {
        &self.snapshot.version
    }

    /// Apply `f` to a copy of the status and write it back. No-op mutations
    /// are not written.
    pub async fn patch<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut MariaDBStatus),
    {
        let mut status = self.snapshot.status.clone();
        f(&mut status);
        if status == self.snapshot.status {
            return Ok(());
        }
        self.snapshot = self
            .store
            .write_if_version(&self.key, &self.snapshot, &status)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Kubernetes status subresource
// ============================================================================

pub struct KubeStatusStore {
    client: Client,
}

impl KubeStatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn read(&self, key: &ClusterKey) -> Result<StatusSnapshot> {
        let api: Api<MariaDB> = Api::namespaced(self.client.clone(), &key.namespace);
        let mariadb = api.get_status(&key.name).await?;
        Ok(StatusSnapshot {
            version: mariadb.resource_version().unwrap_or_default(),
            status: mariadb.status.unwrap_or_default(),
        })
    }

    async fn write_if_version(
        &self,
        key: &ClusterKey,
        base: &StatusSnapshot,
        status: &MariaDBStatus,
    ) -> Result<StatusSnapshot> {
        let api: Api<MariaDB> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": base.version },
            "status": status_diff(&base.status, status)?,
        });

        let patched = api
            .patch_status(
                &key.name,
                &PatchParams::apply("mariadb-operator"),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| match e {
                kube::Error::Api(ae) if ae.code == 409 => Error::Conflict(format!(
                    "status of {key} changed since version {}",
                    base.version
                )),
                other => Error::KubeError(other),
            })?;

        debug!("Patched status of {} at version {}", key, base.version);
        Ok(StatusSnapshot {
            version: patched.resource_version().unwrap_or_default(),
            status: patched.status.unwrap_or_default(),
        })
    }
}

/// JSON merge patch (RFC 7386) turning `old` into `new`. Nested objects are
/// diffed key by key, and cleared fields are sent as explicit nulls.
pub(crate) fn status_diff(old: &MariaDBStatus, new: &MariaDBStatus) -> Result<Value> {
    let old = as_object(serde_json::to_value(old)?);
    let new = as_object(serde_json::to_value(new)?);
    Ok(Value::Object(merge_diff(&old, &new)))
}

fn merge_diff(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut diff = Map::new();
    for (field, value) in new {
        match (old.get(field), value) {
            (Some(before), _) if before == value => {}
            (Some(Value::Object(before)), Value::Object(after)) => {
                diff.insert(field.clone(), Value::Object(merge_diff(before, after)));
            }
            _ => {
                diff.insert(field.clone(), value.clone());
            }
        }
    }
    for field in old.keys() {
        if !new.contains_key(field) {
            diff.insert(field.clone(), Value::Null);
        }
    }
    diff
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Versioned in-process store with the same conflict semantics as the API server
#[derive(Default)]
pub struct MemoryStatusStore {
    entries: Mutex<HashMap<ClusterKey, (MariaDBStatus, u64)>>,
    history: Mutex<Vec<(ClusterKey, MariaDBStatus)>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest committed status, bypassing versioning
    pub async fn current(&self, key: &ClusterKey) -> MariaDBStatus {
        self.entries
            .lock()
            .await
            .get(key)
            .map(|(status, _)| status.clone())
            .unwrap_or_default()
    }

    /// Every committed write of a cluster, oldest first
    pub async fn history(&self, key: &ClusterKey) -> Vec<MariaDBStatus> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, status)| status.clone())
            .collect()
    }

    /// Overwrite the status as an external writer would
    pub async fn seed(&self, key: &ClusterKey, status: MariaDBStatus) {
        let mut entries = self.entries.lock().await;
        let version = entries.get(key).map(|(_, v)| v + 1).unwrap_or(1);
        entries.insert(key.clone(), (status, version));
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn read(&self, key: &ClusterKey) -> Result<StatusSnapshot> {
        let entries = self.entries.lock().await;
        let (status, version) = entries.get(key).cloned().unwrap_or_default();
        Ok(StatusSnapshot {
            status,
            version: version.to_string(),
        })
    }

    async fn write_if_version(
        &self,
        key: &ClusterKey,
        base: &StatusSnapshot,
        status: &MariaDBStatus,
    ) -> Result<StatusSnapshot> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).map(|(_, v)| *v).unwrap_or_default();
        if current.to_string() != base.version {
            return Err(Error::Conflict(format!(
                "status of {key} is at version {current}, write based on {}",
                base.version
            )));
        }
        let version = current + 1;
        entries.insert(key.clone(), (status.clone(), version));
        self.history
            .lock()
            .await
            .push((key.clone(), status.clone()));
        Ok(StatusSnapshot {
            status: status.clone(),
            version: version.to_string(),
        })
    }
}
