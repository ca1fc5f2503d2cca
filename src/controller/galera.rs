//! Galera pass: health check, recovery when quorum is lost, and the routing
//! primary once the cluster is healthy.

use tracing::{info, instrument, warn};

use super::conditions::{
    self, CONDITION_GALERA_READY, REASON_GALERA_PROVISIONING, REASON_RECOVERY_EXHAUSTED,
};
use super::context::PassContext;
use super::deadline::Deadline;
use super::events::{REASON_PRIMARY_SWITCHED, REASON_RECOVERY_EXHAUSTED as EVENT_RECOVERY_EXHAUSTED};
use super::health::{self, HealthMonitor};
use super::recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryRegistry};
use super::store::StatusHandle;
use crate::agent::RecoveryAgents;
use crate::crd::{GaleraConfig, PrimaryConfig};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GaleraOutcome {
    Healthy,
    /// Never been healthy yet, no recovery attempted
    Provisioning,
    /// Unhealthy with recovery disabled
    Degraded,
    Recovered { bootstrap: i32 },
    /// Recovery ran but the Health Monitor could not confirm health
    Unconfirmed,
    Interrupted,
}

impl GaleraOutcome {
    /// Label for the recoveries metric, when a recovery ran
    pub fn recovery_label(&self) -> Option<&'static str> {
        match self {
            GaleraOutcome::Recovered { .. } => Some("recovered"),
            GaleraOutcome::Unconfirmed => Some("unconfirmed"),
            GaleraOutcome::Interrupted => Some("interrupted"),
            _ => None,
        }
    }
}

#[instrument(skip_all, fields(cluster = %status.key()))]
pub async fn reconcile_galera(
    ctx: &PassContext<'_>,
    config: &GaleraConfig,
    agents: &dyn RecoveryAgents,
    recoveries: &RecoveryRegistry,
    status: &mut StatusHandle<'_>,
) -> Result<GaleraOutcome> {
    let recovery = &config.recovery;
    let pass = Deadline::after(recovery.pass_budget(ctx.mariadb.spec.replicas));
    let monitor = HealthMonitor::new(
        ctx.members,
        ctx.clients,
        ctx.settings.poll_interval,
        ctx.settings.query_timeout,
    );

    // Only an established cluster gets the full window; a degraded or
    // provisioning one is probed once.
    let report = if status.status().is_condition_true(CONDITION_GALERA_READY) {
        monitor
            .poll_until_healthy(pass.child(recovery.cluster_healthy_timeout()))
            .await?
    } else {
        monitor.check(&pass).await?
    };

    if report.healthy {
        health::confirm_healthy(status, ctx.events, &report).await?;
        route_primary(ctx, &config.primary, status).await?;
        return Ok(GaleraOutcome::Healthy);
    }

    if status.status().condition(CONDITION_GALERA_READY).is_none() {
        let message = format!("waiting for Galera cluster: {}", report.observation);
        status
            .patch(|s| conditions::set_not_ready(s, REASON_GALERA_PROVISIONING, &message))
            .await?;
        return Ok(GaleraOutcome::Provisioning);
    }

    health::declare_unhealthy(status, ctx.events, &report).await?;
    if !recovery.enabled {
        return Ok(GaleraOutcome::Degraded);
    }

    let ticket = recoveries.begin(status.key().clone());
    let coordinator = RecoveryCoordinator::new(ctx, agents, recovery, &ticket);

    match coordinator.recover(status, pass).await {
        Ok(RecoveryOutcome::Interrupted) => Ok(GaleraOutcome::Interrupted),
        Ok(RecoveryOutcome::Recovered { bootstrap }) => {
            let report = monitor
                .poll_until_healthy(pass.child(recovery.cluster_healthy_timeout()))
                .await?;
            if report.healthy {
                info!("Galera cluster recovered from member {}", bootstrap);
                health::confirm_healthy(status, ctx.events, &report).await?;
                route_primary(ctx, &config.primary, status).await?;
                Ok(GaleraOutcome::Recovered { bootstrap })
            } else {
                warn!("Galera cluster still unhealthy after recovery: {}", report.observation);
                health::declare_unhealthy(status, ctx.events, &report).await?;
                Ok(GaleraOutcome::Unconfirmed)
            }
        }
        Err(Error::RecoveryExhausted(message)) => {
            status
                .patch(|s| {
                    s.galera_recovery = None;
                    conditions::set_galera_not_ready(s, REASON_RECOVERY_EXHAUSTED, &message);
                })
                .await?;
            ctx.events
                .warning(EVENT_RECOVERY_EXHAUSTED, message.clone())
                .await;
            Err(Error::RecoveryExhausted(message))
        }
        Err(e) => Err(e),
    }
}

/// Keep a single routing primary on a healthy cluster: the pinned member if
/// ready, else the current one if ready, else the lowest ready member.
async fn route_primary(
    ctx: &PassContext<'_>,
    primary: &PrimaryConfig,
    status: &mut StatusHandle<'_>,
) -> Result<()> {
    let readiness = ctx.members.readiness().await?;
    let current = status.status().current_primary_pod_index;

    let target = primary
        .pod_index
        .filter(|i| readiness.is_ready(*i))
        .or(current.filter(|i| readiness.is_ready(*i)))
        .or_else(|| {
            if primary.automatic_failover {
                readiness.ready_indices().first().copied()
            } else {
                None
            }
        });

    let Some(target) = target else {
        return Ok(());
    };
    if Some(target) == current {
        return Ok(());
    }

    ctx.members.route_primary(target).await?;
    status
        .patch(|s| s.update_current_primary(ctx.mariadb, target))
        .await?;

    if let Some(previous) = current {
        ctx.events
            .normal(
                REASON_PRIMARY_SWITCHED,
                format!("Primary switched from member {previous} to member {target}"),
            )
            .await;
    }
    Ok(())
}
