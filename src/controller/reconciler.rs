//! Reconciliation entry point for MariaDB clusters

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::conditions::{self, REASON_INVALID_CONFIGURATION, REASON_STANDALONE};
use super::context::{PassContext, PassSettings};
use super::deadline::Deadline;
use super::events::{EventSink, KubeEventSink};
use super::galera::{self, GaleraOutcome};
use super::members::KubeMembers;
#[cfg(feature = "metrics")]
use super::metrics;
use super::recovery::RecoveryRegistry;
use super::replication::FailoverController;
use super::router::MemberEventRouter;
use super::store::{ClusterKey, KubeStatusStore, StatusHandle};
use crate::agent::AgentClientSet;
use crate::crd::{HaMode, MariaDB};
use crate::error::{Error, Result};
use crate::sql::{ClientSet, Credentials, MySqlConnector};

/// Requeue interval while a cluster is degraded or still coming up
const DEGRADED_REQUEUE: Duration = Duration::from_secs(10);

/// Shared state for the MariaDB controller
pub struct ControllerState {
    /// Kubernetes client for API interactions
    pub client: Client,
    /// Restrict the controller to one namespace
    pub namespace: Option<String>,
    pub settings: PassSettings,
    /// Galera recoveries in flight, shared with the member event router
    pub recoveries: RecoveryRegistry,
}

impl ControllerState {
    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Main entry point to start the MariaDB controller. `on_ready` runs once the
/// CRD is confirmed and the watch is about to start.
pub async fn run_controller<F>(state: Arc<ControllerState>, on_ready: F) -> Result<()>
where
    F: FnOnce(),
{
    let mariadbs: Api<MariaDB> = state.api();
    let pods: Api<Pod> = state.api();

    info!("Starting MariaDB controller");

    // Verify CRD exists
    match mariadbs.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("MariaDB CRD is available"),
        Err(e) => {
            error!("MariaDB CRD not found: {:?}", e);
            return Err(Error::ConfigError("MariaDB CRD not installed".to_string()));
        }
    }

    let router = Arc::new(MemberEventRouter::new(state.recoveries.clone()));
    on_ready();

    Controller::new(mariadbs, Config::default())
        .watches(pods, Config::default(), move |pod| router.route(&pod))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled MariaDB: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function for MariaDB
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<MariaDB>, ctx: Arc<ControllerState>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_pass(&obj, &ctx).await;

    #[cfg(feature = "metrics")]
    {
        let mode = obj
            .spec
            .ha_mode()
            .map(|m| m.kind().as_str())
            .unwrap_or("invalid");
        metrics::observe_reconcile_duration_seconds(mode, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::inc_reconcile_error(e.kind());
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    result
}

async fn reconcile_pass(obj: &Arc<MariaDB>, ctx: &ControllerState) -> Result<Action> {
    let key = ClusterKey::of(obj);
    info!("Reconciling MariaDB {}", key);

    let store = KubeStatusStore::new(ctx.client.clone());
    let events = KubeEventSink::new(ctx.client.clone(), obj);
    let mut status = StatusHandle::load(&store, key.clone()).await?;

    // Validate spec
    if let Err(e) = obj.spec.validate() {
        return Err(reject_invalid(&mut status, &events, e).await);
    }
    let mode = obj.spec.ha_mode().map_err(Error::ValidationError)?;

    let credentials = Credentials::root(root_password(&ctx.client, obj).await?);
    let members = KubeMembers::new(ctx.client.clone(), obj.clone());
    let clients = ClientSet::new(
        MySqlConnector::for_cluster(obj, credentials.clone(), ctx.settings.query_timeout),
        obj.spec.replicas,
    );
    let pass = PassContext {
        mariadb: obj,
        members: &members,
        clients: &clients,
        credentials: &credentials,
        events: &events,
        settings: &ctx.settings,
    };

    let result = dispatch(&pass, mode, &ctx.recoveries, &mut status).await;
    clients.close().await;

    #[cfg(feature = "metrics")]
    metrics::set_cluster_healthy(
        &key.namespace,
        &key.name,
        status.status().is_condition_true(conditions::CONDITION_READY),
    );

    result
}

/// Record an invalid spec on the cluster and turn it into the pass error
async fn reject_invalid(
    status: &mut StatusHandle<'_>,
    events: &dyn EventSink,
    reason: String,
) -> Error {
    warn!("Validation failed for {}: {}", status.key(), reason);
    if let Err(e) = status
        .patch(|s| conditions::set_not_ready(s, REASON_INVALID_CONFIGURATION, &reason))
        .await
    {
        return e;
    }
    events
        .warning(REASON_INVALID_CONFIGURATION, reason.clone())
        .await;
    Error::ValidationError(reason)
}

/// Hand the pass to exactly one HA handler
async fn dispatch(
    pass: &PassContext<'_>,
    mode: HaMode<'_>,
    recoveries: &RecoveryRegistry,
    status: &mut StatusHandle<'_>,
) -> Result<Action> {
    let requeue = Action::requeue(pass.settings.requeue_interval);

    match mode {
        HaMode::None => {
            let readiness = pass.members.readiness().await?;
            status
                .patch(|s| {
                    if readiness.is_ready(0) {
                        conditions::set_ready(s, REASON_STANDALONE, "member 0 is ready");
                    } else {
                        conditions::set_not_ready(s, REASON_STANDALONE, "member 0 is not ready");
                    }
                })
                .await?;
            Ok(requeue)
        }
        HaMode::Galera(config) => {
            let agents = AgentClientSet::for_cluster(
                pass.mariadb,
                config.agent.port,
                pass.settings.query_timeout,
            )?;
            let outcome = galera::reconcile_galera(pass, config, &agents, recoveries, status).await;

            #[cfg(feature = "metrics")]
            match &outcome {
                Ok(o) => {
                    if let Some(label) = o.recovery_label() {
                        metrics::inc_galera_recovery(label);
                    }
                }
                Err(Error::RecoveryExhausted(_)) => metrics::inc_galera_recovery("exhausted"),
                Err(_) => {}
            }

            match outcome? {
                GaleraOutcome::Healthy | GaleraOutcome::Recovered { .. } => Ok(requeue),
                GaleraOutcome::Interrupted => Ok(Action::requeue(Duration::ZERO)),
                GaleraOutcome::Provisioning
                | GaleraOutcome::Degraded
                | GaleraOutcome::Unconfirmed => Ok(Action::requeue(DEGRADED_REQUEUE)),
            }
        }
        HaMode::Replication(config) => {
            let deadline = Deadline::after(pass.settings.replication_pass_timeout);
            let outcome = FailoverController::new(pass, config)
                .reconcile(status, deadline)
                .await?;

            if outcome.switched() {
                #[cfg(feature = "metrics")]
                metrics::inc_primary_failover(&status.key().namespace, &status.key().name);
            }
            if outcome.primary.is_none() {
                return Ok(Action::requeue(DEGRADED_REQUEUE));
            }
            Ok(requeue)
        }
    }
}

/// Root password from the Secret referenced by the cluster
async fn root_password(client: &Client, mariadb: &MariaDB) -> Result<String> {
    let selector = &mariadb.spec.root_password_secret_key_ref;
    let namespace = mariadb.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);

    let secret = api.get(&selector.name).await?;
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&selector.key))
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "secret {}/{} has no key {}",
                namespace, selector.name, selector.key
            ))
        })?;

    String::from_utf8(value.0.clone()).map_err(|_| {
        Error::ConfigError(format!(
            "key {} of secret {}/{} is not valid UTF-8",
            selector.key, namespace, selector.name
        ))
    })
}

/// Error policy for the controller
fn error_policy(mariadb: Arc<MariaDB>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {}: {:?}",
        mariadb.name_any(),
        error
    );

    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
