use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A MariaDB GTID position: one `domain-server-sequence` triple per replication domain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GtidPosition {
    domains: BTreeMap<u32, (u32, u64)>,
}

impl GtidPosition {
    pub fn sequence(&self, domain: u32) -> Option<u64> {
        self.domains.get(&domain).map(|(_, seq)| *seq)
    }

    /// Replication progress summed over all domains
    pub fn progress(&self) -> u64 {
        self.domains.values().map(|(_, seq)| *seq).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl FromStr for GtidPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut domains = BTreeMap::new();
        for gtid in s.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            let parts: Vec<&str> = gtid.split('-').collect();
            let parsed = match parts.as_slice() {
                [domain, server, seq] => domain
                    .parse::<u32>()
                    .ok()
                    .zip(server.parse::<u32>().ok())
                    .zip(seq.parse::<u64>().ok()),
                _ => None,
            };
            let ((domain, server), seq) =
                parsed.ok_or_else(|| Error::ConfigError(format!("invalid GTID {gtid:?}")))?;
            domains.insert(domain, (server, seq));
        }
        Ok(Self { domains })
    }
}

impl fmt::Display for GtidPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gtids: Vec<String> = self
            .domains
            .iter()
            .map(|(domain, (server, seq))| format!("{domain}-{server}-{seq}"))
            .collect();
        write!(f, "{}", gtids.join(","))
    }
}
