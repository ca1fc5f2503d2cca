//! Galera recovery agent client
//!
//! Every Galera member runs a co-located agent exposing its last committed
//! sequence number and a way to force the member into bootstrap mode.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::crd::MariaDB;
use crate::error::{Error, Result};

/// Recovery state reported by `GET /sequence`
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraSequence {
    pub uuid: String,
    pub seqno: i64,
    #[serde(default)]
    pub safe_to_bootstrap: bool,
}

/// Recovery agents of one cluster, addressed by member index
#[async_trait]
pub trait RecoveryAgents: Send + Sync {
    async fn sequence(&self, index: i32) -> Result<GaleraSequence>;

    async fn bootstrap(&self, index: i32) -> Result<()>;

    async fn health(&self, index: i32) -> Result<bool>;
}

/// HTTP client for a single agent
#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    http: HttpClient,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    #[instrument(skip(self), fields(agent = %self.base_url))]
    pub async fn sequence(&self) -> Result<GaleraSequence> {
        let response = self
            .http
            .get(format!("{}/sequence", self.base_url))
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json::<GaleraSequence>().await?)
    }

    #[instrument(skip(self), fields(agent = %self.base_url))]
    pub async fn bootstrap(&self) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/bootstrap", self.base_url))
            .send()
            .await?;
        check_status(response).await?;
        debug!("Agent {} marked member safe to bootstrap", self.base_url);
        Ok(())
    }

    pub async fn health(&self) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::AgentError {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

/// Agents of every member of a cluster
pub struct AgentClientSet {
    agents: Vec<AgentClient>,
}

impl AgentClientSet {
    pub fn for_cluster(mariadb: &MariaDB, port: u16, timeout: Duration) -> Result<Self> {
        let agents = (0..mariadb.spec.replicas)
            .map(|i| AgentClient::new(format!("http://{}:{}", mariadb.member_endpoint(i), port), timeout))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { agents })
    }

    fn agent(&self, index: i32) -> Result<&AgentClient> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.agents.get(i))
            .ok_or_else(|| Error::ConfigError(format!("no recovery agent for member {index}")))
    }
}

#[async_trait]
impl RecoveryAgents for AgentClientSet {
    async fn sequence(&self, index: i32) -> Result<GaleraSequence> {
        self.agent(index)?.sequence().await
    }

    async fn bootstrap(&self, index: i32) -> Result<()> {
        self.agent(index)?.bootstrap().await
    }

    async fn health(&self, index: i32) -> Result<bool> {
        self.agent(index)?.health().await
    }
}
