//! Operator configuration from command-line flags and environment

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::controller::PassSettings;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mariadb-operator")]
#[command(about = "High availability coordination for MariaDB clusters on Kubernetes")]
#[command(version)]
pub struct OperatorConfig {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Address of the metrics and probe server
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Default log directive, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Requeue interval after a successful pass
    #[arg(long, default_value_t = 30)]
    pub requeue_interval_secs: u64,

    /// Ceiling for a single engine connect or query
    #[arg(long, default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Interval between health polls
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_millis: u64,

    /// Overall budget of a replication failover pass
    #[arg(long, default_value_t = 60)]
    pub replication_pass_timeout_secs: u64,
}

impl OperatorConfig {
    pub fn pass_settings(&self) -> PassSettings {
        PassSettings {
            poll_interval: Duration::from_millis(self.poll_interval_millis),
            query_timeout: Duration::from_secs(self.connect_timeout_secs),
            replication_pass_timeout: Duration::from_secs(self.replication_pass_timeout_secs),
            requeue_interval: Duration::from_secs(self.requeue_interval_secs),
        }
    }
}
