use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::{Connector, EngineClient};
use crate::error::{Error, Result};

/// Pass-scoped set of member connections, opened lazily per index
pub struct ClientSet {
    connector: Arc<dyn Connector>,
    replicas: i32,
    clients: Mutex<BTreeMap<i32, Arc<dyn EngineClient>>>,
}

impl ClientSet {
    pub fn new(connector: Arc<dyn Connector>, replicas: i32) -> Self {
        Self {
            connector,
            replicas,
            clients: Mutex::new(BTreeMap::new()),
        }
    }

    /// Client for the member at `index`. Connection failures are not retried
    /// here; callers decide whether to move on to another index.
    pub async fn client_for_index(&self, index: i32) -> Result<Arc<dyn EngineClient>> {
        if index < 0 || index >= self.replicas {
            return Err(Error::ConfigError(format!(
                "member index {index} is out of range for {} replicas",
                self.replicas
            )));
        }

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&index) {
            return Ok(client.clone());
        }

        let client = self
            .connector
            .connect(index)
            .await
            .map_err(|e| Error::NotReady(format!("member {index}: {e}")))?;
        clients.insert(index, client.clone());
        Ok(client)
    }

    /// Drop the cached connection to a member, e.g. after restarting it
    pub async fn invalidate(&self, index: i32) {
        let removed = self.clients.lock().await.remove(&index);
        if let Some(client) = removed {
            debug!("Closing connection to member {}", index);
            client.close().await;
        }
    }

    /// Release every open connection
    pub async fn close(&self) {
        let clients = std::mem::take(&mut *self.clients.lock().await);
        for client in clients.into_values() {
            client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::sql::{
        GaleraClusterStatus, GtidPosition, PrimarySettings, ReplicaSettings, ReplicaSource,
    };

    struct NullClient {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EngineClient for NullClient {
        async fn galera_cluster_status(&self) -> Result<GaleraClusterStatus> {
            Ok(GaleraClusterStatus::Primary)
        }
        async fn galera_cluster_size(&self) -> Result<i32> {
            Ok(1)
        }
        async fn galera_local_state(&self) -> Result<String> {
            Ok("Synced".to_string())
        }
        async fn gtid_position(&self) -> Result<GtidPosition> {
            Ok(GtidPosition::default())
        }
        async fn gtid_binlog_position(&self) -> Result<String> {
            Ok(String::new())
        }
        async fn replica_source(&self) -> Result<Option<ReplicaSource>> {
            Ok(None)
        }
        async fn configure_replica(&self, _settings: &ReplicaSettings) -> Result<()> {
            Ok(())
        }
        async fn promote(&self, _settings: &PrimarySettings) -> Result<()> {
            Ok(())
        }
        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingConnector {
        connects: AtomicUsize,
        closed: Arc<AtomicUsize>,
        unreachable: i32,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, index: i32) -> Result<Arc<dyn EngineClient>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if index == self.unreachable {
                return Err(Error::Timeout("connect".to_string()));
            }
            Ok(Arc::new(NullClient {
                closed: self.closed.clone(),
            }))
        }
    }

    fn connector(unreachable: i32) -> Arc<CountingConnector> {
        Arc::new(CountingConnector {
            connects: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            unreachable,
        })
    }

    #[tokio::test]
    async fn test_connections_are_cached_per_index() {
        let conn = connector(-1);
        let set = ClientSet::new(conn.clone(), 3);
        set.client_for_index(1).await.unwrap();
        set.client_for_index(1).await.unwrap();
        set.client_for_index(2).await.unwrap();
        assert_eq!(conn.connects.load(Ordering::SeqCst), 2);

        set.close().await;
        assert_eq!(conn.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_member_is_not_ready() {
        let set = ClientSet::new(connector(0), 3);
        let err = set.client_for_index(0).await.err().unwrap();
        assert!(matches!(err, Error::NotReady(_)));
    }

    #[tokio::test]
    async fn test_index_out_of_range() {
        let set = ClientSet::new(connector(-1), 3);
        assert!(matches!(
            set.client_for_index(3).await.err().unwrap(),
            Error::ConfigError(_)
        ));
    }

    #[tokio::test]
    async fn test_invalidate_reconnects() {
        let conn = connector(-1);
        let set = ClientSet::new(conn.clone(), 2);
        set.client_for_index(0).await.unwrap();
        set.invalidate(0).await;
        set.client_for_index(0).await.unwrap();
        assert_eq!(conn.connects.load(Ordering::SeqCst), 2);
        assert_eq!(conn.closed.load(Ordering::SeqCst), 1);
    }
}
