//! Replication Primary Failover Controller
//!
//! Keeps `currentPrimaryPodIndex` and the primary Service pointed at a single
//! member, and every other ready member replicating from it.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::conditions::{
    self, REASON_NO_FAILOVER_CANDIDATE, REASON_PRIMARY_NOT_READY, REASON_REPLICATION_CONFIGURED,
};
use super::context::PassContext;
use super::deadline::Deadline;
use super::events::{REASON_PRIMARY_NOT_READY as EVENT_PRIMARY_NOT_READY, REASON_PRIMARY_SWITCHED};
use super::members::Readiness;
use super::store::StatusHandle;
use crate::crd::{GtidMode, ReplicationConfig};
use crate::error::Result;
use crate::sql::{EngineClient, PrimarySettings, ReplicaSettings};

/// Seconds a replica waits between reconnection attempts to its primary
const CONNECT_RETRY_SECONDS: u32 = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FailoverOutcome {
    /// Primary after this pass, if one could be established
    pub primary: Option<i32>,
    /// Primary recorded before this pass, when it changed
    pub previous: Option<i32>,
    pub promoted: bool,
    /// Members pointed at the primary during this pass
    pub reconfigured: Vec<i32>,
}

impl FailoverOutcome {
    pub fn switched(&self) -> bool {
        self.previous.is_some() && self.previous != self.primary
    }
}

enum Choice {
    Primary(i32),
    /// The primary is down and cannot be replaced
    Unavailable { reason: &'static str, message: String },
}

pub struct FailoverController<'a> {
    ctx: &'a PassContext<'a>,
    config: &'a ReplicationConfig,
}

impl<'a> FailoverController<'a> {
    pub fn new(ctx: &'a PassContext<'a>, config: &'a ReplicationConfig) -> Self {
        Self { ctx, config }
    }

    #[instrument(skip_all, fields(cluster = %status.key()))]
    pub async fn reconcile(
        &self,
        status: &mut StatusHandle<'_>,
        deadline: Deadline,
    ) -> Result<FailoverOutcome> {
        let readiness = self.ctx.members.readiness().await?;
        let current = status.status().current_primary_pod_index;

        let primary = match self.choose(&readiness, current, &deadline).await {
            Choice::Primary(index) => index,
            Choice::Unavailable { reason, message } => {
                warn!("{}", message);
                let transition = status.status().is_condition_true(conditions::CONDITION_READY)
                    || status.status().condition(conditions::CONDITION_READY).is_none();
                status
                    .patch(|s| conditions::set_not_ready(s, reason, &message))
                    .await?;
                if transition {
                    self.ctx.events.warning(EVENT_PRIMARY_NOT_READY, message).await;
                }
                return Ok(FailoverOutcome {
                    primary: None,
                    ..Default::default()
                });
            }
        };

        let mut outcome = FailoverOutcome {
            primary: Some(primary),
            previous: current.filter(|c| *c != primary),
            ..Default::default()
        };

        let client = self.query(primary, &deadline).await?;
        let source = deadline
            .child(self.ctx.settings.query_timeout)
            .run("reading replica status", client.replica_source())
            .await?;
        if source.is_some() || current != Some(primary) {
            info!("Promoting member {} to primary", primary);
            let settings = PrimarySettings {
                wait_point: self.config.replica.wait_point,
                sync_binlog: self.config.sync_binlog,
            };
            deadline
                .child(self.ctx.settings.query_timeout)
                .run("promoting primary", client.promote(&settings))
                .await?;
            outcome.promoted = true;
        }

        let seed_position = match self.config.replica.gtid {
            GtidMode::ReplicateMasterPos => Some(
                deadline
                    .child(self.ctx.settings.query_timeout)
                    .run("reading binlog position", client.gtid_binlog_position())
                    .await?,
            ),
            _ => None,
        };
        let settings = ReplicaSettings {
            primary_host: self.ctx.mariadb.member_endpoint(primary),
            primary_port: self.ctx.mariadb.spec.port,
            credentials: self.ctx.credentials.clone(),
            gtid: self.config.replica.gtid,
            seed_position,
            connect_retry_seconds: CONNECT_RETRY_SECONDS,
        };

        for replica in readiness.ready_indices().into_iter().filter(|i| *i != primary) {
            if self.configure_replica(replica, &settings, &deadline).await? {
                outcome.reconfigured.push(replica);
            }
        }

        if current != Some(primary) {
            self.ctx.members.route_primary(primary).await?;
        }
        let message = format!(
            "primary is member {primary}, {} replicas following",
            readiness.ready_count() - 1
        );
        status
            .patch(|s| {
                s.update_current_primary(self.ctx.mariadb, primary);
                conditions::set_ready(s, REASON_REPLICATION_CONFIGURED, &message);
            })
            .await?;

        if let Some(previous) = outcome.previous {
            self.ctx
                .events
                .normal(
                    REASON_PRIMARY_SWITCHED,
                    format!("Primary switched from member {previous} to member {primary}"),
                )
                .await;
        }
        Ok(outcome)
    }

    /// Decide which member should be primary. Operator intent wins when its
    /// member is ready; a healthy current primary is never replaced otherwise.
    async fn choose(&self, readiness: &Readiness, current: Option<i32>, deadline: &Deadline) -> Choice {
        let target = self.config.primary.pod_index.or(current).unwrap_or(0);
        if readiness.is_ready(target) {
            return Choice::Primary(target);
        }
        if let Some(current) = current.filter(|c| *c != target && readiness.is_ready(*c)) {
            return Choice::Primary(current);
        }

        if !self.config.primary.automatic_failover {
            return Choice::Unavailable {
                reason: REASON_PRIMARY_NOT_READY,
                message: format!(
                    "primary member {target} is not ready and automatic failover is disabled"
                ),
            };
        }

        match self.elect(readiness, deadline).await {
            Some(elected) => {
                info!("Primary member {} is not ready, elected member {}", target, elected);
                Choice::Primary(elected)
            }
            None => Choice::Unavailable {
                reason: REASON_NO_FAILOVER_CANDIDATE,
                message: format!(
                    "primary member {target} is not ready and no ready member can replace it"
                ),
            },
        }
    }

    /// Ready member with the most advanced GTID position, lowest index on ties
    async fn elect(&self, readiness: &Readiness, deadline: &Deadline) -> Option<i32> {
        let mut best: Option<(i32, u64)> = None;
        for index in readiness.ready_indices() {
            let position = match self.query(index, deadline).await {
                Ok(client) => {
                    deadline
                        .child(self.ctx.settings.query_timeout)
                        .run("reading GTID position", client.gtid_position())
                        .await
                }
                Err(e) => Err(e),
            };
            match position {
                Ok(position) => {
                    let progress = position.progress();
                    debug!("Member {} is at {} ({})", index, position, progress);
                    if best.map(|(_, top)| progress > top).unwrap_or(true) {
                        best = Some((index, progress));
                    }
                }
                Err(e) => {
                    warn!("Skipping member {} in election: {}", index, e);
                    self.ctx.clients.invalidate(index).await;
                }
            }
        }
        best.map(|(index, _)| index)
    }

    /// Point `replica` at the primary unless it already follows it.
    /// Returns whether anything was changed.
    async fn configure_replica(
        &self,
        replica: i32,
        settings: &ReplicaSettings,
        deadline: &Deadline,
    ) -> Result<bool> {
        let client = self.query(replica, deadline).await?;
        let source = deadline
            .child(self.ctx.settings.query_timeout)
            .run("reading replica status", client.replica_source())
            .await?;
        if source.map(|s| s.follows(&settings.primary_host)).unwrap_or(false) {
            debug!("Member {} already replicates from {}", replica, settings.primary_host);
            return Ok(false);
        }

        info!("Configuring member {} to replicate from {}", replica, settings.primary_host);
        deadline
            .child(self.ctx.settings.query_timeout)
            .run("configuring replica", client.configure_replica(settings))
            .await?;
        Ok(true)
    }

    async fn query(&self, index: i32, deadline: &Deadline) -> Result<Arc<dyn EngineClient>> {
        deadline
            .child(self.ctx.settings.query_timeout)
            .run("connecting to member", self.ctx.clients.client_for_index(index))
            .await
    }
}
