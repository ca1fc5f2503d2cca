//! Status condition helpers
//!
//! Conditions are keyed by type: setting a condition replaces the existing
//! entry of that type. The transition time only moves when the status flips.

use crate::crd::{Condition, MariaDBStatus};

pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_GALERA_READY: &str = "GaleraReady";

pub const REASON_GALERA_READY: &str = "GaleraReady";
pub const REASON_GALERA_NOT_READY: &str = "GaleraNotReady";
pub const REASON_GALERA_PROVISIONING: &str = "GaleraProvisioning";
pub const REASON_RECOVERY_EXHAUSTED: &str = "GaleraRecoveryExhausted";
pub const REASON_REPLICATION_CONFIGURED: &str = "ReplicationConfigured";
pub const REASON_PRIMARY_NOT_READY: &str = "PrimaryNotReady";
pub const REASON_NO_FAILOVER_CANDIDATE: &str = "NoFailoverCandidate";
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfiguration";
pub const REASON_STANDALONE: &str = "Standalone";

pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let now = chrono::Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        return;
    }

    conditions.push(Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        last_transition_time: now,
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: None,
    });
}

pub fn set_ready(status: &mut MariaDBStatus, reason: &str, message: &str) {
    set_condition(&mut status.conditions, CONDITION_READY, "True", reason, message);
}

pub fn set_not_ready(status: &mut MariaDBStatus, reason: &str, message: &str) {
    set_condition(&mut status.conditions, CONDITION_READY, "False", reason, message);
}

/// Galera degraded: both GaleraReady and Ready go False
pub fn set_galera_not_ready(status: &mut MariaDBStatus, reason: &str, message: &str) {
    set_condition(&mut status.conditions, CONDITION_GALERA_READY, "False", reason, message);
    set_not_ready(status, reason, message);
}

pub fn set_galera_ready(status: &mut MariaDBStatus, message: &str) {
    set_condition(
        &mut status.conditions,
        CONDITION_GALERA_READY,
        "True",
        REASON_GALERA_READY,
        message,
    );
    set_ready(status, REASON_GALERA_READY, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_is_keyed_by_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", "True", "Ok", "all good");
        set_condition(&mut conditions, "Ready", "False", "Broken", "not good");
        set_condition(&mut conditions, "GaleraReady", "False", "Broken", "not good");

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].status, "False");
        assert_eq!(conditions[0].reason, "Broken");
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, "Ready", "False", "A", "first");
        conditions[0].last_transition_time = "2024-01-01T00:00:00+00:00".to_string();
        set_condition(&mut conditions, "Ready", "False", "B", "second");

        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00+00:00");
        assert_eq!(conditions[0].message, "second");
    }

    #[test]
    fn test_galera_not_ready_also_clears_ready() {
        let mut status = MariaDBStatus::default();
        set_galera_ready(&mut status, "healthy");
        set_galera_not_ready(&mut status, REASON_GALERA_NOT_READY, "cluster size mismatch");

        assert!(status.is_condition_false(CONDITION_READY));
        assert!(status.is_condition_false(CONDITION_GALERA_READY));
    }
}
