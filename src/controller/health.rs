//! Health Monitor
//!
//! Decides, within a bounded window, whether a Galera cluster is healthy. The
//! engines' own membership view is the only ground truth: a reachable member
//! can still sit in a minority partition, so connectivity alone proves nothing.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::conditions::{self, CONDITION_GALERA_READY, REASON_GALERA_NOT_READY};
use super::deadline::Deadline;
use super::events::{EventSink, REASON_CLUSTER_HEALTHY, REASON_CLUSTER_NOT_HEALTHY};
use super::members::{Members, Readiness};
use super::store::StatusHandle;
use crate::error::Result;
use crate::sql::{ClientSet, GaleraClusterStatus};

/// What the last health probe saw
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    AllReady { members: i32 },
    NoneReady { expected: i32 },
    Consensus { index: i32, size: i32 },
    NotPrimary { index: i32, status: GaleraClusterStatus },
    SizeMismatch { index: i32, expected: i32, observed: i32 },
    Unreachable { ready: i32 },
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::AllReady { members } => write!(f, "all {members} members are ready"),
            Observation::NoneReady { expected } => {
                write!(f, "no ready members: expected {expected}, observed 0")
            }
            Observation::Consensus { index, size } => {
                write!(f, "member {index} reports Primary with cluster size {size}")
            }
            Observation::NotPrimary { index, status } => {
                write!(f, "member {index} reports cluster status {status}")
            }
            Observation::SizeMismatch {
                expected, observed, ..
            } => write!(f, "cluster size mismatch: expected {expected}, observed {observed}"),
            Observation::Unreachable { ready } => {
                write!(f, "none of the {ready} ready members could be queried")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: bool,
    pub observation: Observation,
}

impl HealthReport {
    fn healthy(observation: Observation) -> Self {
        Self {
            healthy: true,
            observation,
        }
    }

    fn unhealthy(observation: Observation) -> Self {
        Self {
            healthy: false,
            observation,
        }
    }
}

pub struct HealthMonitor<'a> {
    members: &'a dyn Members,
    clients: &'a ClientSet,
    poll_interval: Duration,
    query_timeout: Duration,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(
        members: &'a dyn Members,
        clients: &'a ClientSet,
        poll_interval: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            members,
            clients,
            poll_interval,
            query_timeout,
        }
    }

    /// Poll until the cluster is healthy, no member is ready, or `deadline`
    /// passes. Every probe runs at least once.
    pub async fn poll_until_healthy(&self, deadline: Deadline) -> Result<HealthReport> {
        loop {
            let readiness = self.members.readiness().await?;
            let report = self.probe(&readiness, &deadline).await;
            if report.healthy || matches!(report.observation, Observation::NoneReady { .. }) {
                return Ok(report);
            }
            debug!("Galera cluster not healthy yet: {}", report.observation);
            if !deadline.sleep(self.poll_interval).await {
                info!("Galera cluster not healthy: {}", report.observation);
                return Ok(report);
            }
        }
    }

    /// A single probe over the current readiness
    pub async fn check(&self, deadline: &Deadline) -> Result<HealthReport> {
        let readiness = self.members.readiness().await?;
        Ok(self.probe(&readiness, deadline).await)
    }

    async fn probe(&self, readiness: &Readiness, deadline: &Deadline) -> HealthReport {
        if readiness.all_ready() {
            return HealthReport::healthy(Observation::AllReady {
                members: readiness.expected,
            });
        }
        let ready = readiness.ready_indices();
        if ready.is_empty() {
            return HealthReport::unhealthy(Observation::NoneReady {
                expected: readiness.expected,
            });
        }

        let mut last = Observation::Unreachable {
            ready: ready.len() as i32,
        };
        for index in ready {
            let query = deadline.child(self.query_timeout);
            match self.member_view(index, readiness.expected, &query).await {
                Ok(observation @ Observation::Consensus { .. }) => {
                    return HealthReport::healthy(observation);
                }
                Ok(observation) => last = observation,
                Err(e) => {
                    warn!("Failed to query member {}: {}", index, e);
                    self.clients.invalidate(index).await;
                }
            }
        }
        HealthReport::unhealthy(last)
    }

    async fn member_view(&self, index: i32, expected: i32, deadline: &Deadline) -> Result<Observation> {
        let client = deadline
            .run("connecting to member", self.clients.client_for_index(index))
            .await?;

        let status = deadline
            .run("querying cluster status", client.galera_cluster_status())
            .await?;
        if status != GaleraClusterStatus::Primary {
            return Ok(Observation::NotPrimary { index, status });
        }

        let size = deadline
            .run("querying cluster size", client.galera_cluster_size())
            .await?;
        if size != expected {
            return Ok(Observation::SizeMismatch {
                index,
                expected,
                observed: size,
            });
        }
        Ok(Observation::Consensus { index, size })
    }
}

/// Record degradation. Any in-flight recovery bookkeeping is discarded.
pub async fn declare_unhealthy(
    status: &mut StatusHandle<'_>,
    events: &dyn EventSink,
    report: &HealthReport,
) -> Result<()> {
    let transition = !status.status().is_condition_false(CONDITION_GALERA_READY);
    let message = report.observation.to_string();

    status
        .patch(|s| {
            s.galera_recovery = None;
            conditions::set_galera_not_ready(s, REASON_GALERA_NOT_READY, &message);
        })
        .await?;

    if transition {
        events
            .warning(
                REASON_CLUSTER_NOT_HEALTHY,
                format!("Galera cluster is not healthy: {message}"),
            )
            .await;
    }
    Ok(())
}

/// Record re-confirmed health, clearing recovery bookkeeping in the same write
pub async fn confirm_healthy(
    status: &mut StatusHandle<'_>,
    events: &dyn EventSink,
    report: &HealthReport,
) -> Result<()> {
    let transition = status.status().is_condition_false(CONDITION_GALERA_READY);
    let message = report.observation.to_string();

    status
        .patch(|s| {
            s.galera_recovery = None;
            conditions::set_galera_ready(s, &message);
        })
        .await?;

    if transition {
        events
            .normal(REASON_CLUSTER_HEALTHY, format!("Galera cluster is healthy: {message}"))
            .await;
    }
    Ok(())
}
