//! Controller module for MariaDB high availability
//!
//! This module contains the controller loop, the member event router, and the
//! health, recovery and failover logic that runs inside each reconciliation pass.

pub mod conditions;
mod context;
mod deadline;
pub mod events;
mod galera;
pub mod health;
pub mod members;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod recovery;
mod replication;
pub mod router;
pub mod store;

#[cfg(test)]
mod fakes;
#[cfg(test)]
mod router_test;

pub use context::{PassContext, PassSettings};
pub use deadline::Deadline;
pub use galera::{reconcile_galera, GaleraOutcome};
pub use reconciler::{run_controller, ControllerState};
pub use recovery::{select_candidate, RecoveryOutcome, RecoveryRegistry};
pub use replication::{FailoverController, FailoverOutcome};
pub use store::{ClusterKey, MemoryStatusStore, StatusHandle, StatusSnapshot, StatusStore};
