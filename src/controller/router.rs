//! Member Event Router
//!
//! Maps member pod events onto the cluster they belong to. Only pods carrying
//! the cluster marker plus exactly one HA mode marker are considered. A Galera
//! member losing readiness in the middle of a recovery interrupts it.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::{debug, info};

use super::members::pod_is_ready;
use super::recovery::RecoveryRegistry;
use super::store::ClusterKey;
use crate::crd::{HaKind, MariaDB};

pub const MARIADB_ANNOTATION: &str = "mariadb.mmontes.io/mariadb";
pub const REPLICATION_ANNOTATION: &str = "mariadb.mmontes.io/replication";
pub const GALERA_ANNOTATION: &str = "mariadb.mmontes.io/galera";

/// A pod identified as a member of an HA cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRef {
    pub cluster: ClusterKey,
    pub index: i32,
    pub mode: HaKind,
    pub ready: bool,
}

/// Identify the cluster member behind `pod`, if it is one
pub fn member_of(pod: &Pod) -> Option<MemberRef> {
    let annotations = pod.annotations();
    let cluster = annotations.get(MARIADB_ANNOTATION)?;
    let mode = match (
        annotations.contains_key(REPLICATION_ANNOTATION),
        annotations.contains_key(GALERA_ANNOTATION),
    ) {
        (true, false) => HaKind::Replication,
        (false, true) => HaKind::Galera,
        _ => return None,
    };

    let index = pod
        .name_any()
        .strip_prefix(cluster.as_str())?
        .strip_prefix('-')?
        .parse::<i32>()
        .ok()?;

    Some(MemberRef {
        cluster: ClusterKey::new(
            pod.namespace().unwrap_or_else(|| "default".to_string()),
            cluster.clone(),
        ),
        index,
        mode,
        ready: pod_is_ready(pod),
    })
}

pub struct MemberEventRouter {
    recoveries: RecoveryRegistry,
    last_ready: Mutex<HashMap<(ClusterKey, i32), bool>>,
}

impl MemberEventRouter {
    pub fn new(recoveries: RecoveryRegistry) -> Self {
        Self {
            recoveries,
            last_ready: Mutex::new(HashMap::new()),
        }
    }

    /// Route a pod event to the cluster that should be reconciled
    pub fn route(&self, pod: &Pod) -> Option<ObjectRef<MariaDB>> {
        let member = member_of(pod)?;

        let was_ready = self
            .last_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((member.cluster.clone(), member.index), member.ready);

        if was_ready == Some(true) && !member.ready {
            debug!(
                "Member {} of {} is no longer ready",
                member.index, member.cluster
            );
            if member.mode == HaKind::Galera
                && self.recoveries.interrupt(&member.cluster, member.index)
            {
                info!(
                    "Interrupting Galera recovery of {}: member {} degraded",
                    member.cluster, member.index
                );
            }
        }

        if !member.ready && pod.metadata.deletion_timestamp.is_some() {
            self.forget(&member);
        }

        Some(ObjectRef::new(&member.cluster.name).within(&member.cluster.namespace))
    }

    fn forget(&self, member: &MemberRef) {
        self.last_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(member.cluster.clone(), member.index));
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.last_ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
