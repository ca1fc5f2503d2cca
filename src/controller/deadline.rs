//! Deadlines threaded through every bounded operation of a pass

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};

/// Stand-in for "never" when a duration does not fit the clock
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn from_now(duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(duration).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Point in time by which an operation must finish
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: from_now(duration),
        }
    }

    /// A deadline `duration` from now, never later than this one
    pub fn child(&self, duration: Duration) -> Self {
        Self {
            at: self.at.min(from_now(duration)),
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Run `fut`, failing with [`Error::Timeout`] once the deadline passes
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(what.to_string())),
        }
    }

    /// Sleep for `interval` or until the deadline, whichever comes first.
    /// Returns false when the deadline has been reached.
    pub async fn sleep(&self, interval: Duration) -> bool {
        let wake = self.at.min(from_now(interval));
        tokio::time::sleep_until(wake).await;
        !self.is_expired()
    }
}
