//! Unit tests for the Member Event Router

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    use crate::controller::recovery::RecoveryRegistry;
    use crate::controller::router::{
        member_of, MemberEventRouter, GALERA_ANNOTATION, MARIADB_ANNOTATION,
        REPLICATION_ANNOTATION,
    };
    use crate::controller::store::ClusterKey;
    use crate::crd::HaKind;

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn pod(name: &str, annotations: &[&str], ready: bool) -> Pod {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|key| {
                let value = if *key == MARIADB_ANNOTATION { "galera" } else { "" };
                (key.to_string(), value.to_string())
            })
            .collect();
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("db".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: if ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn galera_member(index: i32, ready: bool) -> Pod {
        pod(
            &format!("galera-{index}"),
            &[MARIADB_ANNOTATION, GALERA_ANNOTATION],
            ready,
        )
    }

    fn terminating(mut pod: Pod) -> Pod {
        pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        pod
    }

    fn key() -> ClusterKey {
        ClusterKey::new("db", "galera")
    }

    // -------------------------------------------------------------------------
    // Filtering
    // -------------------------------------------------------------------------

    #[test]
    fn test_member_identified_from_annotations() {
        let member = member_of(&galera_member(2, true)).unwrap();
        assert_eq!(member.cluster, key());
        assert_eq!(member.index, 2);
        assert_eq!(member.mode, HaKind::Galera);
        assert!(member.ready);

        let replica = member_of(&pod(
            "galera-0",
            &[MARIADB_ANNOTATION, REPLICATION_ANNOTATION],
            false,
        ))
        .unwrap();
        assert_eq!(replica.mode, HaKind::Replication);
        assert!(!replica.ready);
    }

    #[test]
    fn test_pods_without_exactly_one_mode_are_ignored() {
        assert!(member_of(&pod("galera-0", &[MARIADB_ANNOTATION], true)).is_none());
        assert!(member_of(&pod("galera-0", &[GALERA_ANNOTATION], true)).is_none());
        assert!(member_of(&pod(
            "galera-0",
            &[MARIADB_ANNOTATION, GALERA_ANNOTATION, REPLICATION_ANNOTATION],
            true,
        ))
        .is_none());
    }

    #[test]
    fn test_pod_name_must_carry_member_index() {
        let annotations = [MARIADB_ANNOTATION, GALERA_ANNOTATION];
        assert!(member_of(&pod("galera-backup", &annotations, true)).is_none());
        assert!(member_of(&pod("other-0", &annotations, true)).is_none());
        assert!(member_of(&pod("galera0", &annotations, true)).is_none());
    }

    #[test]
    fn test_route_targets_owning_cluster() {
        let router = MemberEventRouter::new(RecoveryRegistry::new());
        let target = router.route(&galera_member(1, true)).unwrap();
        assert_eq!(target.name, "galera");
        assert_eq!(target.namespace.as_deref(), Some("db"));
    }

    // -------------------------------------------------------------------------
    // Recovery interruption
    // -------------------------------------------------------------------------

    #[test]
    fn test_losing_readiness_interrupts_recovery() {
        let registry = RecoveryRegistry::new();
        let router = MemberEventRouter::new(registry.clone());
        router.route(&galera_member(2, true));

        let ticket = registry.begin(key());
        router.route(&galera_member(2, false));

        assert!(ticket.token().is_cancelled());
    }

    #[test]
    fn test_first_unready_event_does_not_interrupt() {
        let registry = RecoveryRegistry::new();
        let router = MemberEventRouter::new(registry.clone());
        let ticket = registry.begin(key());

        router.route(&galera_member(2, false));
        router.route(&galera_member(2, false));

        assert!(!ticket.token().is_cancelled());
    }

    #[test]
    fn test_replication_members_never_interrupt() {
        let registry = RecoveryRegistry::new();
        let router = MemberEventRouter::new(registry.clone());
        let annotations = [MARIADB_ANNOTATION, REPLICATION_ANNOTATION];
        router.route(&pod("galera-0", &annotations, true));

        let ticket = registry.begin(key());
        router.route(&pod("galera-0", &annotations, false));

        assert!(!ticket.token().is_cancelled());
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    #[test]
    fn test_deleted_member_is_forgotten() {
        let registry = RecoveryRegistry::new();
        let router = MemberEventRouter::new(registry.clone());
        router.route(&galera_member(0, true));
        router.route(&galera_member(1, true));
        assert_eq!(router.tracked(), 2);

        let ticket = registry.begin(key());
        router.route(&terminating(galera_member(1, false)));

        assert!(ticket.token().is_cancelled());
        assert_eq!(router.tracked(), 1);
    }

    #[test]
    fn test_replacement_pod_starts_untracked() {
        let registry = RecoveryRegistry::new();
        let router = MemberEventRouter::new(registry.clone());
        router.route(&galera_member(0, true));
        router.route(&terminating(galera_member(0, true)));
        assert_eq!(router.tracked(), 0);

        let ticket = registry.begin(key());
        router.route(&galera_member(0, false));

        assert!(!ticket.token().is_cancelled());
        assert_eq!(router.tracked(), 1);
    }
}
