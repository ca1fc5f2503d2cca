//! Prometheus metrics for the MariaDB operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `mariadb_reconcile_duration_seconds` (histogram): reconcile duration labeled by HA mode.
//! - `mariadb_reconcile_errors_total` (counter): reconcile errors labeled by error kind.
//! - `mariadb_galera_recoveries_total` (counter): Galera recoveries labeled by outcome.
//! - `mariadb_primary_failovers_total` (counter): primary switches labeled by namespace/name.
//! - `mariadb_cluster_healthy` (gauge): 1 when the cluster is Ready, labeled by namespace/name.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels identifying a cluster
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// HA mode, e.g. "galera"
    pub mode: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error kind/category, e.g. "kube", "timeout"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RecoveryLabels {
    /// "recovered", "unconfirmed", "interrupted" or "exhausted"
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> =
    Lazy::new(|| {
        fn reconcile_histogram() -> Histogram {
            // 10ms .. ~11min; recovery passes are long.
            Histogram::new(exponential_buckets(0.01, 2.0, 16))
        }

        Family::new_with_constructor(reconcile_histogram)
    });

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static GALERA_RECOVERIES_TOTAL: Lazy<Family<RecoveryLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PRIMARY_FAILOVERS_TOTAL: Lazy<Family<ClusterLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CLUSTER_HEALTHY: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Global metrics registry. Counter names get their `_total` suffix from the encoder.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "mariadb_reconcile_duration_seconds",
        "Duration of reconcile passes in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "mariadb_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "mariadb_galera_recoveries",
        "Galera forced bootstrap attempts by outcome",
        GALERA_RECOVERIES_TOTAL.clone(),
    );
    registry.register(
        "mariadb_primary_failovers",
        "Number of times the primary moved to another member",
        PRIMARY_FAILOVERS_TOTAL.clone(),
    );
    registry.register(
        "mariadb_cluster_healthy",
        "Whether the cluster is Ready (1) or not (0)",
        CLUSTER_HEALTHY.clone(),
    );
    registry
});

fn cluster_labels(namespace: &str, name: &str) -> ClusterLabels {
    ClusterLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(mode: &str, seconds: f64) {
    let labels = ReconcileLabels {
        mode: mode.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(kind: &str) {
    let labels = ErrorLabels {
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_galera_recovery(outcome: &str) {
    let labels = RecoveryLabels {
        outcome: outcome.to_string(),
    };
    GALERA_RECOVERIES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_primary_failover(namespace: &str, name: &str) {
    PRIMARY_FAILOVERS_TOTAL
        .get_or_create(&cluster_labels(namespace, name))
        .inc();
}

pub fn set_cluster_healthy(namespace: &str, name: &str, healthy: bool) {
    CLUSTER_HEALTHY
        .get_or_create(&cluster_labels(namespace, name))
        .set(if healthy { 1 } else { 0 });
}
