//! Optimistic concurrency of the status store.
//!
//! Concurrent passes over the same cluster read the same status version; only
//! the first write based on it may commit, so no status version ever records
//! two different primaries.

use std::sync::Arc;

use tokio::sync::Barrier;

use mariadb_k8s::controller::{ClusterKey, MemoryStatusStore, StatusHandle, StatusStore};
use mariadb_k8s::crd::MariaDBStatus;
use mariadb_k8s::Error;

fn key() -> ClusterKey {
    ClusterKey::new("db", "repl")
}

#[tokio::test]
async fn racing_writers_commit_once() {
    let store = Arc::new(MemoryStatusStore::new());
    let barrier = Arc::new(Barrier::new(8));

    let writers: Vec<_> = (0..8)
        .map(|index| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                let mut status = StatusHandle::load(&*store, key()).await?;
                barrier.wait().await;
                status
                    .patch(|s| s.current_primary_pod_index = Some(index))
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    for writer in writers {
        match writer.await.unwrap() {
            Ok(()) => committed += 1,
            Err(Error::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(committed, 1);
    assert_eq!(store.history(&key()).await.len(), 1);
    assert!(store.current(&key()).await.current_primary_pod_index.is_some());
}

#[tokio::test]
async fn reload_after_conflict_succeeds() {
    let store = MemoryStatusStore::new();
    let mut stale = StatusHandle::load(&store, key()).await.unwrap();

    store
        .seed(
            &key(),
            MariaDBStatus {
                current_primary_pod_index: Some(1),
                ..Default::default()
            },
        )
        .await;

    let err = stale
        .patch(|s| s.current_primary_pod_index = Some(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(store.current(&key()).await.current_primary_pod_index, Some(1));

    let mut fresh = StatusHandle::load(&store, key()).await.unwrap();
    fresh
        .patch(|s| s.current_primary_pod_index = Some(2))
        .await
        .unwrap();
    assert_eq!(store.current(&key()).await.current_primary_pod_index, Some(2));
}

#[tokio::test]
async fn versions_advance_per_write() {
    let store = MemoryStatusStore::new();
    let first = store.read(&key()).await.unwrap();

    let second = store
        .write_if_version(&key(), &first, &MariaDBStatus::default())
        .await
        .unwrap();
    assert_ne!(first.version, second.version);

    let replay = store
        .write_if_version(&key(), &first, &MariaDBStatus::default())
        .await;
    assert!(matches!(replay, Err(Error::Conflict(_))));
}
