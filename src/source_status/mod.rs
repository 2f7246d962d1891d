//! Source Status Tracker
//!
//! Tracks per-source liveness so fleet tooling can tell which cameras went
//! quiet. Only transitions are surfaced to avoid spamming downstream logs.
//!
//! The `DetectorClient` reports "source was active at T" through the
//! [`SourceActivitySink`] trait whenever a successful inference yields at
//! least one detection; this tracker is the default implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Receives source-activity signals from the inference client
#[async_trait]
pub trait SourceActivitySink: Send + Sync {
    /// Called when a source produced detections at `at`
    async fn source_active(&self, source_id: &str, at: DateTime<Utc>);
}

/// Source connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceConnectionStatus {
    /// Initial state (never observed)
    Unknown,
    /// Source is producing frames
    Online,
    /// Source stopped responding
    Offline,
}

/// Status transition event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatusEvent {
    /// Source went from Online to Offline
    Lost,
    /// Source went from Offline to Online
    Recovered,
}

#[derive(Debug, Clone)]
struct SourceEntry {
    status: SourceConnectionStatus,
    last_active_at: Option<DateTime<Utc>>,
}

/// Tracks source liveness and detects transitions
pub struct SourceStatusTracker {
    sources: RwLock<HashMap<String, SourceEntry>>,
}

impl SourceStatusTracker {
    /// Create new tracker
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Record that a source was active at `at`
    pub async fn mark_active(&self, source_id: &str, at: DateTime<Utc>) {
        let mut sources = self.sources.write().await;
        let entry = sources.entry(source_id.to_string()).or_insert(SourceEntry {
            status: SourceConnectionStatus::Unknown,
            last_active_at: None,
        });
        entry.last_active_at = Some(at);
    }

    /// Update source status and return the transition event if any.
    ///
    /// A first observation that is offline counts as `Lost`; a first
    /// observation that is online produces no event.
    pub async fn update_status(
        &self,
        source_id: &str,
        is_online: bool,
    ) -> Option<SourceStatusEvent> {
        let mut sources = self.sources.write().await;
        let entry = sources.entry(source_id.to_string()).or_insert(SourceEntry {
            status: SourceConnectionStatus::Unknown,
            last_active_at: None,
        });

        let prev = entry.status;
        let next = if is_online {
            SourceConnectionStatus::Online
        } else {
            SourceConnectionStatus::Offline
        };
        entry.status = next;

        match (prev, next) {
            (SourceConnectionStatus::Online, SourceConnectionStatus::Offline) => {
                tracing::warn!(source_id = %source_id, "Source connection lost");
                Some(SourceStatusEvent::Lost)
            }
            (SourceConnectionStatus::Offline, SourceConnectionStatus::Online) => {
                tracing::info!(source_id = %source_id, "Source connection recovered");
                Some(SourceStatusEvent::Recovered)
            }
            (SourceConnectionStatus::Unknown, SourceConnectionStatus::Offline) => {
                tracing::warn!(source_id = %source_id, "Source first observation failed - marking as lost");
                Some(SourceStatusEvent::Lost)
            }
            _ => None,
        }
    }

    /// Current status for a source
    pub async fn get_status(&self, source_id: &str) -> SourceConnectionStatus {
        self.sources
            .read()
            .await
            .get(source_id)
            .map(|e| e.status)
            .unwrap_or(SourceConnectionStatus::Unknown)
    }

    /// Timestamp of the source's last detection activity
    pub async fn last_active_at(&self, source_id: &str) -> Option<DateTime<Utc>> {
        self.sources
            .read()
            .await
            .get(source_id)
            .and_then(|e| e.last_active_at)
    }

    /// Sources currently marked offline
    pub async fn offline_sources(&self) -> Vec<String> {
        self.sources
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.status == SourceConnectionStatus::Offline)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Sources with no activity since `cutoff`
    pub async fn stale_sources(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.sources
            .read()
            .await
            .iter()
            .filter(|(_, e)| match e.last_active_at {
                Some(at) => at < cutoff,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove a source from tracking (e.g. when deleted)
    pub async fn remove(&self, source_id: &str) {
        self.sources.write().await.remove(source_id);
    }

    /// Clear all tracking state
    pub async fn clear(&self) {
        self.sources.write().await.clear();
    }
}

impl Default for SourceStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceActivitySink for SourceStatusTracker {
    async fn source_active(&self, source_id: &str, at: DateTime<Utc>) {
        self.mark_active(source_id, at).await;
        self.update_status(source_id, true).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_initial_online_no_event() {
        let tracker = SourceStatusTracker::new();
        assert!(tracker.update_status("cam1", true).await.is_none());
    }

    #[tokio::test]
    async fn test_initial_offline_triggers_lost() {
        let tracker = SourceStatusTracker::new();
        assert_eq!(
            tracker.update_status("cam1", false).await,
            Some(SourceStatusEvent::Lost)
        );
    }

    #[tokio::test]
    async fn test_online_to_offline_triggers_lost() {
        let tracker = SourceStatusTracker::new();
        tracker.update_status("cam1", true).await;
        assert_eq!(
            tracker.update_status("cam1", false).await,
            Some(SourceStatusEvent::Lost)
        );
    }

    #[tokio::test]
    async fn test_offline_to_online_triggers_recovered() {
        let tracker = SourceStatusTracker::new();
        tracker.update_status("cam1", false).await;
        assert_eq!(
            tracker.update_status("cam1", true).await,
            Some(SourceStatusEvent::Recovered)
        );
    }

    #[tokio::test]
    async fn test_same_status_no_event() {
        let tracker = SourceStatusTracker::new();
        tracker.update_status("cam1", true).await;
        assert!(tracker.update_status("cam1", true).await.is_none());
        tracker.update_status("cam1", false).await;
        assert!(tracker.update_status("cam1", false).await.is_none());
    }

    #[tokio::test]
    async fn test_activity_sink_marks_online_and_active() {
        let tracker = SourceStatusTracker::new();
        let now = Utc::now();
        tracker.source_active("cam1", now).await;

        assert_eq!(tracker.get_status("cam1").await, SourceConnectionStatus::Online);
        assert_eq!(tracker.last_active_at("cam1").await, Some(now));
    }

    #[tokio::test]
    async fn test_stale_sources() {
        let tracker = SourceStatusTracker::new();
        let now = Utc::now();
        tracker.mark_active("fresh", now).await;
        tracker.mark_active("stale", now - Duration::minutes(10)).await;
        tracker.update_status("silent", false).await;

        let stale = tracker.stale_sources(now - Duration::minutes(1)).await;
        assert!(stale.contains(&"stale".to_string()));
        assert!(stale.contains(&"silent".to_string()));
        assert!(!stale.contains(&"fresh".to_string()));

        assert_eq!(tracker.offline_sources().await, vec!["silent".to_string()]);
    }
}
