//! MariaDB operator high availability core
//!
//! Keeps replicated MariaDB clusters on Kubernetes available: Galera clusters
//! are health checked and force-bootstrapped after losing quorum, and
//! replication clusters keep a single primary with every ready member
//! replicating from it.

pub mod agent;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
#[cfg(feature = "metrics")]
pub mod server;
pub mod sql;
pub mod telemetry;

pub use error::{Error, Result};
