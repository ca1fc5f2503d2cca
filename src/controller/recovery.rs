//! Galera Recovery Coordinator
//!
//! Drives a forced bootstrap once quorum is lost:
//!
//! 1. `AssessingSequence`: ask every member's recovery agent for its last
//!    committed sequence number. Members that do not answer within
//!    `podRecoveryTimeout` are left out of this round.
//! 2. `Bootstrapping`: the most advanced member (lowest index on ties) is
//!    marked safe to bootstrap and restarted. If it does not found a Primary
//!    view within `clusterBootstrapTimeout` it is excluded and assessment
//!    starts over.
//! 3. `RestartingPeers`: the remaining members are restarted one at a time,
//!    each given `podSyncTimeout` to sync.
//!
//! The coordinator never declares the cluster healthy. That is left to the
//! Health Monitor once peers are back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::context::PassContext;
use super::deadline::Deadline;
use super::events::{REASON_BOOTSTRAP_FAILED, REASON_RECOVERY_STARTED};
use super::store::{ClusterKey, StatusHandle};
use crate::agent::RecoveryAgents;
use crate::crd::{GaleraRecoveryConfig, GaleraRecoveryStatus, MariaDBStatus, RecoveryPhase};
use crate::error::{Error, Result};
use crate::sql::GaleraClusterStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Bootstrap succeeded and every peer was restarted
    Recovered { bootstrap: i32 },
    /// A fresh degradation cancelled the recovery
    Interrupted,
}

/// Pick the member with the highest sequence number, lowest index on ties
pub fn select_candidate(sequences: &BTreeMap<i32, i64>) -> Option<i32> {
    let mut best: Option<(i32, i64)> = None;
    for (&index, &seqno) in sequences {
        match best {
            Some((_, top)) if seqno <= top => {}
            _ => best = Some((index, seqno)),
        }
    }
    best.map(|(index, _)| index)
}

// ============================================================================
// In-flight recoveries
// ============================================================================

struct InFlight {
    id: u64,
    token: CancellationToken,
    restarting: BTreeSet<i32>,
}

/// Recoveries currently running, shared with the member event router
#[derive(Clone, Default)]
pub struct RecoveryRegistry {
    inner: Arc<Mutex<HashMap<ClusterKey, InFlight>>>,
    next_id: Arc<AtomicU64>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClusterKey, InFlight>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a recovery for `key`. A leftover registration is cancelled.
    pub fn begin(&self, key: ClusterKey) -> RecoveryTicket {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let previous = self.lock().insert(
            key.clone(),
            InFlight {
                id,
                token: token.clone(),
                restarting: BTreeSet::new(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        RecoveryTicket {
            registry: self.clone(),
            key,
            id,
            token,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, key: &ClusterKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Cancel the recovery of `key` because member `index` lost readiness.
    /// Members the coordinator restarts itself do not count.
    pub fn interrupt(&self, key: &ClusterKey, index: i32) -> bool {
        match self.lock().get(key) {
            Some(in_flight) if !in_flight.restarting.contains(&index) => {
                in_flight.token.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Registration of one running recovery, removed on drop
pub struct RecoveryTicket {
    registry: RecoveryRegistry,
    key: ClusterKey,
    id: u64,
    token: CancellationToken,
}

impl RecoveryTicket {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn mark_restarting(&self, index: i32) {
        if let Some(in_flight) = self.registry.lock().get_mut(&self.key) {
            if in_flight.id == self.id {
                in_flight.restarting.insert(index);
            }
        }
    }
}

impl Drop for RecoveryTicket {
    fn drop(&mut self) {
        let mut entries = self.registry.lock();
        if entries.get(&self.key).map(|f| f.id) == Some(self.id) {
            entries.remove(&self.key);
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum Milestone {
    Bootstrapped,
    Synced,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::Bootstrapped => write!(f, "did not reach a Primary view"),
            Milestone::Synced => write!(f, "did not sync with the cluster"),
        }
    }
}

pub struct RecoveryCoordinator<'a> {
    ctx: &'a PassContext<'a>,
    agents: &'a dyn RecoveryAgents,
    config: &'a GaleraRecoveryConfig,
    ticket: &'a RecoveryTicket,
}

impl<'a> RecoveryCoordinator<'a> {
    pub fn new(
        ctx: &'a PassContext<'a>,
        agents: &'a dyn RecoveryAgents,
        config: &'a GaleraRecoveryConfig,
        ticket: &'a RecoveryTicket,
    ) -> Self {
        Self {
            ctx,
            agents,
            config,
            ticket,
        }
    }

    /// Run a full recovery, or stop early when the ticket is cancelled.
    /// A cancelled recovery writes nothing further.
    #[instrument(skip_all, fields(cluster = %self.ticket.key))]
    pub async fn recover(
        &self,
        status: &mut StatusHandle<'_>,
        deadline: Deadline,
    ) -> Result<RecoveryOutcome> {
        let token = self.ticket.token().clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                warn!("Galera recovery of {} interrupted", self.ticket.key);
                Ok(RecoveryOutcome::Interrupted)
            }
            result = self.run(status, deadline) => result,
        }
    }

    async fn run(&self, status: &mut StatusHandle<'_>, deadline: Deadline) -> Result<RecoveryOutcome> {
        let mariadb = self.ctx.mariadb;
        let mut excluded = BTreeSet::new();

        self.ctx
            .events
            .normal(
                REASON_RECOVERY_STARTED,
                "Recovering Galera cluster from the most advanced member".to_string(),
            )
            .await;

        let bootstrap = loop {
            let sequences = self.assess(&excluded, &deadline).await;
            let recorded: BTreeMap<String, i64> = sequences
                .iter()
                .map(|(index, seqno)| (mariadb.pod_name(*index), *seqno))
                .collect();
            let excluded_list: Vec<i32> = excluded.iter().copied().collect();
            status
                .patch(|s| {
                    let recovery = recovery_status(s);
                    recovery.phase = RecoveryPhase::AssessingSequence;
                    recovery.sequences = recorded;
                    recovery.bootstrap_pod = None;
                    recovery.excluded = excluded_list;
                })
                .await?;

            let Some(candidate) = select_candidate(&sequences) else {
                return Err(Error::RecoveryExhausted(format!(
                    "no member reported a recovery sequence (excluded after failed bootstrap: {:?})",
                    excluded
                )));
            };

            let pod = mariadb.pod_name(candidate);
            info!(
                "Bootstrapping Galera cluster from {} with seqno {}",
                pod, sequences[&candidate]
            );
            status
                .patch(|s| {
                    let recovery = recovery_status(s);
                    recovery.phase = RecoveryPhase::Bootstrapping;
                    recovery.bootstrap_pod = Some(pod);
                })
                .await?;

            match self.bootstrap(candidate, &deadline).await {
                Ok(()) => break candidate,
                Err(e) => {
                    warn!("Member {} failed to bootstrap: {}", candidate, e);
                    self.ctx
                        .events
                        .warning(
                            REASON_BOOTSTRAP_FAILED,
                            format!("Member {candidate} failed to bootstrap: {e}"),
                        )
                        .await;
                    excluded.insert(candidate);
                }
            }
        };

        status
            .patch(|s| recovery_status(s).phase = RecoveryPhase::RestartingPeers)
            .await?;

        for peer in (0..mariadb.spec.replicas).filter(|i| *i != bootstrap) {
            match self.restart_peer(peer, &deadline).await {
                Ok(()) => debug!("Member {} rejoined", peer),
                Err(Error::Timeout(what)) => warn!("Member {} {}", peer, what),
                Err(e) => return Err(e),
            }
        }

        Ok(RecoveryOutcome::Recovered { bootstrap })
    }

    async fn assess(&self, excluded: &BTreeSet<i32>, deadline: &Deadline) -> BTreeMap<i32, i64> {
        let budget = deadline.child(self.config.pod_recovery_timeout());
        let queries = (0..self.ctx.mariadb.spec.replicas)
            .filter(|index| !excluded.contains(index))
            .map(|index| async move {
                let result = budget
                    .run("querying recovery sequence", self.agents.sequence(index))
                    .await;
                (index, result)
            });

        let mut sequences = BTreeMap::new();
        for (index, result) in join_all(queries).await {
            match result {
                Ok(sequence) => {
                    debug!("Member {} reports seqno {}", index, sequence.seqno);
                    sequences.insert(index, sequence.seqno);
                }
                Err(e) => warn!("Leaving member {} out of bootstrap candidates: {}", index, e),
            }
        }
        sequences
    }

    async fn bootstrap(&self, index: i32, deadline: &Deadline) -> Result<()> {
        let budget = deadline.child(self.config.cluster_bootstrap_timeout());
        let healthy = budget
            .run("probing recovery agent", self.agents.health(index))
            .await?;
        if !healthy {
            return Err(Error::NotReady(format!(
                "recovery agent of member {index} reports unhealthy"
            )));
        }
        budget
            .run("requesting bootstrap", self.agents.bootstrap(index))
            .await?;
        budget.run("restarting member", self.restart(index)).await?;
        self.wait_for(index, Milestone::Bootstrapped, &budget).await
    }

    async fn restart_peer(&self, index: i32, deadline: &Deadline) -> Result<()> {
        let budget = deadline.child(self.config.pod_sync_timeout());
        budget.run("restarting member", self.restart(index)).await?;
        self.wait_for(index, Milestone::Synced, &budget).await
    }

    async fn restart(&self, index: i32) -> Result<()> {
        self.ticket.mark_restarting(index);
        self.ctx.members.restart(index).await?;
        self.ctx.clients.invalidate(index).await;
        Ok(())
    }

    /// Poll a restarted member until it reaches `milestone`
    async fn wait_for(&self, index: i32, milestone: Milestone, budget: &Deadline) -> Result<()> {
        loop {
            if !budget.sleep(self.ctx.settings.poll_interval).await {
                return Err(Error::Timeout(format!("member {index} {milestone}")));
            }
            let query = budget.child(self.ctx.settings.query_timeout);
            match self.reached(index, milestone, &query).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    debug!("Member {} not answering yet: {}", index, e);
                    self.ctx.clients.invalidate(index).await;
                }
            }
        }
    }

    async fn reached(&self, index: i32, milestone: Milestone, deadline: &Deadline) -> Result<bool> {
        let client = deadline
            .run("connecting to member", self.ctx.clients.client_for_index(index))
            .await?;
        match milestone {
            Milestone::Bootstrapped => {
                let status = deadline
                    .run("querying cluster status", client.galera_cluster_status())
                    .await?;
                if status != GaleraClusterStatus::Primary {
                    return Ok(false);
                }
                let size = deadline
                    .run("querying cluster size", client.galera_cluster_size())
                    .await?;
                // Peers may already have rejoined the new component.
                Ok(size >= 1)
            }
            Milestone::Synced => {
                let state = deadline
                    .run("querying local state", client.galera_local_state())
                    .await?;
                Ok(state == "Synced")
            }
        }
    }
}

fn recovery_status(status: &mut MariaDBStatus) -> &mut GaleraRecoveryStatus {
    status
        .galera_recovery
        .get_or_insert_with(GaleraRecoveryStatus::assessing)
}
