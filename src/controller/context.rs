//! Collaborators shared by everything running inside one reconciliation pass

use std::time::Duration;

use super::events::EventSink;
use super::members::Members;
use crate::crd::MariaDB;
use crate::sql::{ClientSet, Credentials};

/// Timing knobs applied to every pass
#[derive(Clone, Debug, PartialEq)]
pub struct PassSettings {
    /// Interval between health and readiness polls
    pub poll_interval: Duration,
    /// Ceiling for a single connect or query
    pub query_timeout: Duration,
    /// Overall budget of a replication failover pass
    pub replication_pass_timeout: Duration,
    /// Requeue interval after a successful pass
    pub requeue_interval: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            query_timeout: Duration::from_secs(5),
            replication_pass_timeout: Duration::from_secs(60),
            requeue_interval: Duration::from_secs(30),
        }
    }
}

pub struct PassContext<'a> {
    pub mariadb: &'a MariaDB,
    pub members: &'a dyn Members,
    pub clients: &'a ClientSet,
    /// Account replicas authenticate with against the primary
    pub credentials: &'a Credentials,
    pub events: &'a dyn EventSink,
    pub settings: &'a PassSettings,
}
