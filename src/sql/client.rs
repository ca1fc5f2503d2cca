use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ConnectOptions, Connection, Executor, Row};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{
    quote, Connector, Credentials, EngineClient, GaleraClusterStatus, GtidPosition,
    PrimarySettings, ReplicaSettings, ReplicaSource,
};
use crate::crd::{GtidMode, MariaDB};
use crate::error::{Error, Result};

/// Connection to a single MariaDB member
pub struct MySqlClient {
    host: String,
    conn: Mutex<Option<MySqlConnection>>,
}

impl MySqlClient {
    /// Connect with a short timeout. No retries.
    pub async fn connect(options: &MySqlConnectOptions, host: &str, timeout: Duration) -> Result<Self> {
        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| Error::Timeout(format!("connecting to {host}")))??;
        Ok(Self {
            host: host.to_string(),
            conn: Mutex::new(Some(conn)),
        })
    }

    async fn fetch_optional(&self, sql: &str) -> Result<Option<MySqlRow>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotReady(format!("connection to {} is closed", self.host)))?;
        Ok(conn.fetch_optional(sqlx::raw_sql(sql)).await?)
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::NotReady(format!("connection to {} is closed", self.host)))?;
        conn.execute(sqlx::raw_sql(sql)).await?;
        Ok(())
    }

    async fn status_variable(&self, name: &str) -> Result<String> {
        let sql = format!("SHOW STATUS LIKE {}", quote(name));
        let row = self
            .fetch_optional(&sql)
            .await?
            .ok_or_else(|| Error::NotReady(format!("{name} is not reported by {}", self.host)))?;
        Ok(row.try_get::<String, _>(1)?)
    }

    async fn select_string(&self, sql: &str) -> Result<String> {
        let row = self
            .fetch_optional(sql)
            .await?
            .ok_or_else(|| Error::NotReady(format!("{sql} returned no rows on {}", self.host)))?;
        Ok(row.try_get::<Option<String>, _>(0)?.unwrap_or_default())
    }
}

#[async_trait]
impl EngineClient for MySqlClient {
    async fn galera_cluster_status(&self) -> Result<GaleraClusterStatus> {
        self.status_variable("wsrep_cluster_status").await?.parse()
    }

    async fn galera_cluster_size(&self) -> Result<i32> {
        let size = self.status_variable("wsrep_cluster_size").await?;
        size.trim()
            .parse::<i32>()
            .map_err(|_| Error::ConfigError(format!("invalid wsrep_cluster_size {size:?}")))
    }

    async fn galera_local_state(&self) -> Result<String> {
        self.status_variable("wsrep_local_state_comment").await
    }

    async fn gtid_position(&self) -> Result<GtidPosition> {
        self.select_string("SELECT @@gtid_current_pos").await?.parse()
    }

    async fn gtid_binlog_position(&self) -> Result<String> {
        self.select_string("SELECT @@gtid_binlog_pos").await
    }

    async fn replica_source(&self) -> Result<Option<ReplicaSource>> {
        let Some(row) = self.fetch_optional("SHOW SLAVE STATUS").await? else {
            return Ok(None);
        };
        let host: String = row.try_get("Master_Host")?;
        if host.is_empty() {
            return Ok(None);
        }
        let io: String = row.try_get("Slave_IO_Running")?;
        let sql: String = row.try_get("Slave_SQL_Running")?;
        Ok(Some(ReplicaSource {
            host,
            io_running: io == "Yes",
            sql_running: sql == "Yes",
        }))
    }

    #[instrument(skip(self, settings), fields(host = %self.host, primary = %settings.primary_host))]
    async fn configure_replica(&self, settings: &ReplicaSettings) -> Result<()> {
        debug!("Reconfiguring {} as replica", self.host);
        self.execute(&replica_statements(settings)).await
    }

    #[instrument(skip(self, settings), fields(host = %self.host))]
    async fn promote(&self, settings: &PrimarySettings) -> Result<()> {
        let statements = [
            "STOP SLAVE".to_string(),
            "RESET SLAVE ALL".to_string(),
            format!(
                "SET GLOBAL rpl_semi_sync_master_wait_point = {}",
                quote(settings.wait_point.as_sql())
            ),
            format!(
                "SET GLOBAL sync_binlog = {}",
                if settings.sync_binlog { 1 } else { 0 }
            ),
            "SET GLOBAL read_only = 0".to_string(),
        ];

        debug!("Promoting {} to primary", self.host);
        self.execute(&statements.join(";\n")).await
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!("Error closing connection to {}: {}", self.host, e);
            }
        }
    }
}

/// Statements pointing a member at the primary in `settings`
pub(crate) fn replica_statements(settings: &ReplicaSettings) -> String {
    let mut statements = vec![
        "STOP SLAVE".to_string(),
        "SET GLOBAL read_only = 1".to_string(),
    ];
    if let (GtidMode::ReplicateMasterPos, Some(pos)) = (settings.gtid, &settings.seed_position) {
        statements.push(format!("SET GLOBAL gtid_slave_pos = {}", quote(pos)));
    }
    statements.push(format!(
        "CHANGE MASTER TO MASTER_HOST={}, MASTER_PORT={}, MASTER_USER={}, MASTER_PASSWORD={}, \
         MASTER_USE_GTID={}, MASTER_CONNECT_RETRY={}",
        quote(&settings.primary_host),
        settings.primary_port,
        quote(&settings.credentials.user),
        quote(&settings.credentials.password),
        settings.gtid.as_sql(),
        settings.connect_retry_seconds
    ));
    statements.push("START SLAVE".to_string());
    statements.join(";\n")
}

/// Opens [`MySqlClient`]s against the stable member endpoints of a cluster
pub struct MySqlConnector {
    endpoints: Vec<String>,
    port: u16,
    credentials: Credentials,
    connect_timeout: Duration,
}

impl MySqlConnector {
    pub fn for_cluster(
        mariadb: &MariaDB,
        credentials: Credentials,
        connect_timeout: Duration,
    ) -> Arc<Self> {
        let endpoints = (0..mariadb.spec.replicas)
            .map(|i| mariadb.member_endpoint(i))
            .collect();
        Arc::new(Self {
            endpoints,
            port: mariadb.spec.port as u16,
            credentials,
            connect_timeout,
        })
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, index: i32) -> Result<Arc<dyn EngineClient>> {
        let host = usize::try_from(index)
            .ok()
            .and_then(|i| self.endpoints.get(i))
            .ok_or_else(|| Error::ConfigError(format!("no endpoint for member {index}")))?;

        let options = MySqlConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(&self.credentials.user)
            .password(&self.credentials.password)
            .disable_statement_logging();

        let client = MySqlClient::connect(&options, host, self.connect_timeout).await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(gtid: GtidMode, seed_position: Option<&str>) -> ReplicaSettings {
        ReplicaSettings {
            primary_host: "mdb-0.mdb-internal.db.svc.cluster.local".to_string(),
            primary_port: 3306,
            credentials: Credentials::root("s3cr'et"),
            gtid,
            seed_position: seed_position.map(str::to_string),
            connect_retry_seconds: 10,
        }
    }

    #[test]
    fn test_replica_statements_authenticate_against_primary() {
        let sql = replica_statements(&settings(GtidMode::CurrentPos, None));
        assert_eq!(
            sql,
            "STOP SLAVE;\n\
             SET GLOBAL read_only = 1;\n\
             CHANGE MASTER TO MASTER_HOST='mdb-0.mdb-internal.db.svc.cluster.local', \
             MASTER_PORT=3306, MASTER_USER='root', MASTER_PASSWORD='s3cr\\'et', \
             MASTER_USE_GTID=current_pos, MASTER_CONNECT_RETRY=10;\n\
             START SLAVE"
        );
    }

    #[test]
    fn test_replica_statements_seed_slave_pos() {
        let sql = replica_statements(&settings(GtidMode::ReplicateMasterPos, Some("0-1-42")));
        assert!(sql.contains("SET GLOBAL gtid_slave_pos = '0-1-42';\nCHANGE MASTER TO"));
        assert!(sql.contains("MASTER_USE_GTID=slave_pos"));
    }

    #[test]
    fn test_seed_position_ignored_outside_replicate_master_pos() {
        let sql = replica_statements(&settings(GtidMode::CurrentPos, Some("0-1-42")));
        assert!(!sql.contains("gtid_slave_pos"));
    }
}
