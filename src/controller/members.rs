//! Member readiness and control through the orchestration platform

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use crate::crd::MariaDB;
use crate::error::{Error, Result};

/// Label the workload controller puts on every member pod
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

/// Per-index readiness of a cluster's members
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    pub expected: i32,
    pub ready: Vec<bool>,
}

impl Readiness {
    pub fn new(ready: Vec<bool>) -> Self {
        Self {
            expected: ready.len() as i32,
            ready,
        }
    }

    pub fn is_ready(&self, index: i32) -> bool {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.ready.get(i))
            .copied()
            .unwrap_or(false)
    }

    pub fn ready_count(&self) -> i32 {
        self.ready.iter().filter(|r| **r).count() as i32
    }

    /// Ready member indices, ascending
    pub fn ready_indices(&self) -> Vec<i32> {
        (0..self.expected).filter(|i| self.is_ready(*i)).collect()
    }

    pub fn all_ready(&self) -> bool {
        self.ready_count() == self.expected
    }
}

#[async_trait]
pub trait Members: Send + Sync {
    async fn readiness(&self) -> Result<Readiness>;

    /// Restart a member. The workload controller brings it back.
    async fn restart(&self, index: i32) -> Result<()>;

    /// Point the primary routing endpoint at a member
    async fn route_primary(&self, index: i32) -> Result<()>;
}

pub struct KubeMembers {
    client: Client,
    mariadb: Arc<MariaDB>,
}

impl KubeMembers {
    pub fn new(client: Client, mariadb: Arc<MariaDB>) -> Self {
        Self { client, mariadb }
    }

    fn namespace(&self) -> String {
        self.mariadb
            .namespace()
            .unwrap_or_else(|| "default".to_string())
    }
}

pub(crate) fn pod_is_ready(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return false;
    }
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Ready")
                .map(|c| c.status == "True")
        })
        .unwrap_or(false)
}

#[async_trait]
impl Members for KubeMembers {
    async fn readiness(&self) -> Result<Readiness> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace());
        let mut ready = Vec::with_capacity(self.mariadb.spec.replicas.max(0) as usize);
        for index in 0..self.mariadb.spec.replicas {
            let pod = api.get_opt(&self.mariadb.pod_name(index)).await?;
            ready.push(pod.as_ref().map(pod_is_ready).unwrap_or(false));
        }
        Ok(Readiness::new(ready))
    }

    async fn restart(&self, index: i32) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace());
        let pod_name = self.mariadb.pod_name(index);
        match api.delete(&pod_name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Restarting member {}", pod_name);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Member {} already gone", pod_name);
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn route_primary(&self, index: i32) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace());
        let service = self.mariadb.primary_service_name();
        let selector: BTreeMap<String, String> =
            [(POD_NAME_LABEL.to_string(), self.mariadb.pod_name(index))].into();
        let patch = serde_json::json!({ "spec": { "selector": selector } });

        match api
            .patch(
                &service,
                &PatchParams::apply("mariadb-operator"),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("Primary service {} not found, skipping routing", service);
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}
