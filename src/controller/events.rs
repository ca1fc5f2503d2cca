//! Kubernetes events published against the cluster resource

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::warn;

use crate::crd::MariaDB;

pub const REASON_CLUSTER_NOT_HEALTHY: &str = "GaleraClusterNotHealthy";
pub const REASON_CLUSTER_HEALTHY: &str = "GaleraClusterHealthy";
pub const REASON_RECOVERY_STARTED: &str = "GaleraRecoveryStarted";
pub const REASON_BOOTSTRAP_FAILED: &str = "GaleraBootstrapFailed";
pub const REASON_RECOVERY_EXHAUSTED: &str = "GaleraRecoveryExhausted";
pub const REASON_PRIMARY_SWITCHED: &str = "PrimarySwitched";
pub const REASON_PRIMARY_NOT_READY: &str = "PrimaryNotReady";

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn normal(&self, reason: &str, note: String);

    async fn warning(&self, reason: &str, note: String);
}

pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, mariadb: &MariaDB) -> Self {
        let reporter = Reporter {
            controller: "mariadb-operator".to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter, mariadb.object_ref(&())),
        }
    }

    async fn publish(&self, type_: EventType, reason: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        // Events are best effort
        if let Err(e) = self.recorder.publish(event).await {
            warn!("Failed to publish {} event: {}", reason, e);
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn normal(&self, reason: &str, note: String) {
        self.publish(EventType::Normal, reason, note).await
    }

    async fn warning(&self, reason: &str, note: String) {
        self.publish(EventType::Warning, reason, note).await
    }
}
