//! User reputation collaborator
//!
//! Ledger operations attribute points to users through [`ReputationSink`].
//! Adjustments are fire-and-forget: implementations log failures and never
//! hand them back to the ledger.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reputation counters kept per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    Created,
    Updated,
    Deleted,
    Reverted,
    Mistakes,
}

impl Counter {
    /// Field name of the counter on the user document
    pub fn field(&self) -> &'static str {
        match self {
            Counter::Created => "count_created",
            Counter::Updated => "count_updated",
            Counter::Deleted => "count_deleted",
            Counter::Reverted => "count_reverted",
            Counter::Mistakes => "count_mistakes",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// Sink for reputation adjustments
#[async_trait]
pub trait ReputationSink: Send + Sync {
    /// Add `delta` to `counter` for `username`. Never fails from the
    /// caller's point of view.
    async fn adjust(&self, username: &str, counter: Counter, delta: i64);
}

/// One recorded adjustment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub username: String,
    pub counter: Counter,
    pub delta: i64,
}

/// Sink that keeps every adjustment in memory
#[derive(Default)]
pub struct RecordingReputation {
    adjustments: Mutex<Vec<Adjustment>>,
}

impl RecordingReputation {
    pub fn new() -> Self {
        Self::default()
    }

    /// All adjustments in call order
    pub fn adjustments(&self) -> Vec<Adjustment> {
        self.adjustments
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    /// Net value of one counter for one user
    pub fn total(&self, username: &str, counter: Counter) -> i64 {
        self.adjustments()
            .iter()
            .filter(|a| a.username == username && a.counter == counter)
            .map(|a| a.delta)
            .sum()
    }
}

#[async_trait]
impl ReputationSink for RecordingReputation {
    async fn adjust(&self, username: &str, counter: Counter, delta: i64) {
        if let Ok(mut adjustments) = self.adjustments.lock() {
            adjustments.push(Adjustment {
                username: username.to_string(),
                counter,
                delta,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_totals() {
        let sink = RecordingReputation::new();
        sink.adjust("ada", Counter::Mistakes, 1).await;
        sink.adjust("ada", Counter::Mistakes, -1).await;
        sink.adjust("ada", Counter::Updated, 1).await;
        sink.adjust("bob", Counter::Updated, 1).await;

        assert_eq!(sink.total("ada", Counter::Mistakes), 0);
        assert_eq!(sink.total("ada", Counter::Updated), 1);
        assert_eq!(sink.adjustments().len(), 4);
        assert_eq!(Counter::Reverted.to_string(), "count_reverted");
    }
}
