//! In-process fakes of the pass collaborators

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::context::{PassContext, PassSettings};
use super::events::EventSink;
use super::members::{Members, Readiness};
use crate::agent::{GaleraSequence, RecoveryAgents};
use crate::crd::{GaleraConfig, MariaDB, MariaDBSpec, ReplicationConfig, SecretKeySelector};
use crate::error::{Error, Result};
use crate::sql::{
    ClientSet, Connector, Credentials, EngineClient, GaleraClusterStatus, GtidPosition,
    PrimarySettings, ReplicaSettings, ReplicaSource,
};

/// Root password every fake member accepts for replication
pub const ROOT_PASSWORD: &str = "mariadb";

#[derive(Clone, Debug)]
pub struct EngineState {
    pub reachable: bool,
    pub cluster_status: GaleraClusterStatus,
    pub cluster_size: i32,
    pub local_state: String,
    pub gtid: String,
    pub binlog: String,
    pub source: Option<ReplicaSource>,
}

#[derive(Clone, Debug)]
pub struct AgentState {
    /// `None` makes `GET /sequence` fail
    pub seqno: Option<i64>,
    pub delay: Duration,
    /// Answer of `GET /health`
    pub healthy: bool,
}

type RestartHook = Box<dyn Fn(&mut ClusterState, i32) + Send + Sync>;

pub struct ClusterState {
    pub ready: Vec<bool>,
    pub engines: Vec<EngineState>,
    pub agents: Vec<AgentState>,
    /// Log of control operations, e.g. "promote 0" or "restart 2"
    pub ops: Vec<String>,
    pub queries: usize,
    on_restart: Option<RestartHook>,
}

/// Shared fake cluster implementing members, engines and agents
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    /// Healthy Galera cluster of `n` members
    pub fn galera(n: i32) -> Self {
        let engines = (0..n)
            .map(|_| EngineState {
                reachable: true,
                cluster_status: GaleraClusterStatus::Primary,
                cluster_size: n,
                local_state: "Synced".to_string(),
                gtid: String::new(),
                binlog: String::new(),
                source: None,
            })
            .collect();
        let agents = (0..n)
            .map(|_| AgentState {
                seqno: Some(0),
                delay: Duration::ZERO,
                healthy: true,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                ready: vec![true; n as usize],
                engines,
                agents,
                ops: Vec::new(),
                queries: 0,
                on_restart: None,
            })),
        }
    }

    /// Replication cluster of `n` members, none configured yet
    pub fn replication(n: i32) -> Self {
        let cluster = Self::galera(n);
        cluster.update(|s| {
            for engine in &mut s.engines {
                engine.gtid = "0-1-0".to_string();
            }
        });
        cluster
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut ClusterState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn on_restart(&self, hook: impl Fn(&mut ClusterState, i32) + Send + Sync + 'static) {
        self.update(|s| s.on_restart = Some(Box::new(hook)));
    }

    pub fn ops(&self) -> Vec<String> {
        self.update(|s| s.ops.clone())
    }

    pub fn clear_ops(&self) {
        self.update(|s| s.ops.clear());
    }

    /// Make every member report a minority view of `size`
    pub fn partition(&self, status: GaleraClusterStatus, size: i32) {
        self.update(|s| {
            for engine in &mut s.engines {
                engine.cluster_status = status;
                engine.cluster_size = size;
            }
        });
    }

    pub fn set_ready(&self, index: i32, ready: bool) {
        self.update(|s| s.ready[index as usize] = ready);
    }

    pub fn set_seqnos(&self, seqnos: &[Option<i64>]) {
        self.update(|s| {
            for (agent, seqno) in s.agents.iter_mut().zip(seqnos) {
                agent.seqno = *seqno;
            }
        });
    }

    pub fn engine(&self, index: i32) -> EngineState {
        self.update(|s| s.engines[index as usize].clone())
    }
}

#[async_trait]
impl Members for FakeCluster {
    async fn readiness(&self) -> Result<Readiness> {
        Ok(Readiness::new(self.update(|s| s.ready.clone())))
    }

    async fn restart(&self, index: i32) -> Result<()> {
        self.update(|s| {
            s.ops.push(format!("restart {index}"));
            if let Some(hook) = s.on_restart.take() {
                hook(s, index);
                s.on_restart = Some(hook);
            }
        });
        Ok(())
    }

    async fn route_primary(&self, index: i32) -> Result<()> {
        self.update(|s| s.ops.push(format!("route {index}")));
        Ok(())
    }
}

#[async_trait]
impl Connector for FakeCluster {
    async fn connect(&self, index: i32) -> Result<Arc<dyn EngineClient>> {
        if !self.engine(index).reachable {
            return Err(Error::Timeout(format!("connecting to member {index}")));
        }
        Ok(Arc::new(FakeEngine {
            cluster: self.clone(),
            index,
        }))
    }
}

#[async_trait]
impl RecoveryAgents for FakeCluster {
    async fn sequence(&self, index: i32) -> Result<GaleraSequence> {
        let agent = self.update(|s| s.agents[index as usize].clone());
        tokio::time::sleep(agent.delay).await;
        match agent.seqno {
            Some(seqno) => Ok(GaleraSequence {
                uuid: "6ba3d4a4-0ae8-11ee-a4cd-0e8dd5fd8b07".to_string(),
                seqno,
                safe_to_bootstrap: false,
            }),
            None => Err(Error::AgentError {
                status: 503,
                message: "engine was not stopped cleanly".to_string(),
            }),
        }
    }

    async fn bootstrap(&self, index: i32) -> Result<()> {
        self.update(|s| s.ops.push(format!("bootstrap {index}")));
        Ok(())
    }

    async fn health(&self, index: i32) -> Result<bool> {
        Ok(self.update(|s| s.agents[index as usize].healthy))
    }
}

struct FakeEngine {
    cluster: FakeCluster,
    index: i32,
}

impl FakeEngine {
    fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> Result<R> {
        self.cluster.update(|s| {
            s.queries += 1;
            let engine = &s.engines[self.index as usize];
            if !engine.reachable {
                return Err(Error::NotReady(format!("member {} went away", self.index)));
            }
            Ok(f(engine))
        })
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn galera_cluster_status(&self) -> Result<GaleraClusterStatus> {
        self.read(|e| e.cluster_status)
    }

    async fn galera_cluster_size(&self) -> Result<i32> {
        self.read(|e| e.cluster_size)
    }

    async fn galera_local_state(&self) -> Result<String> {
        self.read(|e| e.local_state.clone())
    }

    async fn gtid_position(&self) -> Result<GtidPosition> {
        self.read(|e| e.gtid.clone())?.parse()
    }

    async fn gtid_binlog_position(&self) -> Result<String> {
        self.read(|e| e.binlog.clone())
    }

    async fn replica_source(&self) -> Result<Option<ReplicaSource>> {
        self.read(|e| e.source.clone())
    }

    async fn configure_replica(&self, settings: &ReplicaSettings) -> Result<()> {
        self.read(|_| ())?;
        let index = self.index;
        let authenticated = settings.credentials == Credentials::root(ROOT_PASSWORD);
        self.cluster.update(|s| {
            s.ops.push(format!("replicate {index} from {}", settings.primary_host));
            if let Some(position) = &settings.seed_position {
                s.ops.push(format!("seed {index} at {position}"));
            }
            s.engines[index as usize].source = Some(ReplicaSource {
                host: settings.primary_host.clone(),
                io_running: authenticated,
                sql_running: true,
            });
        });
        Ok(())
    }

    async fn promote(&self, _settings: &PrimarySettings) -> Result<()> {
        self.read(|_| ())?;
        let index = self.index;
        self.cluster.update(|s| {
            s.ops.push(format!("promote {index}"));
            s.engines[index as usize].source = None;
        });
        Ok(())
    }

    async fn close(&self) {}
}

/// Events captured instead of published
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(String, String, String)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }

    pub fn count(&self, reason: &str) -> usize {
        self.reasons().iter().filter(|r| *r == reason).count()
    }
}

#[async_trait]
impl EventSink for RecordingEvents {
    async fn normal(&self, reason: &str, note: String) {
        self.events
            .lock()
            .unwrap()
            .push(("Normal".to_string(), reason.to_string(), note));
    }

    async fn warning(&self, reason: &str, note: String) {
        self.events
            .lock()
            .unwrap()
            .push(("Warning".to_string(), reason.to_string(), note));
    }
}

// -------------------------------------------------------------------------
// Fixtures
// -------------------------------------------------------------------------

fn mariadb(name: &str, replicas: i32) -> MariaDB {
    let mut mariadb = MariaDB::new(
        name,
        MariaDBSpec {
            replicas,
            port: 3306,
            root_password_secret_key_ref: SecretKeySelector {
                name: "mariadb".to_string(),
                key: "root-password".to_string(),
            },
            replication: None,
            galera: None,
        },
    );
    mariadb.metadata.namespace = Some("db".to_string());
    mariadb
}

pub fn galera_mariadb(replicas: i32, config: GaleraConfig) -> MariaDB {
    let mut mariadb = mariadb("galera", replicas);
    mariadb.spec.galera = Some(config);
    mariadb
}

pub fn replication_mariadb(replicas: i32, config: ReplicationConfig) -> MariaDB {
    let mut mariadb = mariadb("repl", replicas);
    mariadb.spec.replication = Some(config);
    mariadb
}

/// Collaborators of one pass against a fake cluster
pub struct Harness {
    pub mariadb: MariaDB,
    pub cluster: FakeCluster,
    pub clients: ClientSet,
    pub credentials: Credentials,
    pub events: RecordingEvents,
    pub settings: PassSettings,
}

impl Harness {
    pub fn new(mariadb: MariaDB, cluster: FakeCluster) -> Self {
        let clients = ClientSet::new(Arc::new(cluster.clone()), mariadb.spec.replicas);
        Self {
            mariadb,
            cluster,
            clients,
            credentials: Credentials::root(ROOT_PASSWORD),
            events: RecordingEvents::default(),
            settings: PassSettings::default(),
        }
    }

    pub fn pass(&self) -> PassContext<'_> {
        PassContext {
            mariadb: &self.mariadb,
            members: &self.cluster,
            clients: &self.clients,
            credentials: &self.credentials,
            events: &self.events,
            settings: &self.settings,
        }
    }
}
