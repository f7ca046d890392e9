//! Session registry
//!
//! Process-wide map from user identity to [`UserSession`], backed by DashMap.
//!
//! Spans:
//! - `zcc.session.create` - first lookup of an identity
//! - `zcc.session.evict` - idle sweep

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::session::{SessionSettings, UserSession};

/// Snapshot row for `/zcc/sessions.json`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSummary {
    pub identity: String,
    #[serde(rename = "idleSecs")]
    pub idle_secs: f64,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total: usize,
    /// Sessions holding a loaded recording.
    pub with_data: usize,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<UserSession>>,
    idle_threshold: Duration,
    settings: SessionSettings,
}

impl SessionRegistry {
    pub fn new(idle_threshold: Duration, settings: SessionSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_threshold,
            settings,
        }
    }

    pub fn idle_threshold(&self) -> Duration {
        self.idle_threshold
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Look up or create the session for `identity`, refreshing its activity.
    /// An empty identity yields `None`.
    pub fn get_session(&self, identity: &str) -> Option<Arc<UserSession>> {
        if identity.trim().is_empty() {
            tracing::error!("session lookup with an empty identity");
            return None;
        }

        if let Some(existing) = self.sessions.get(identity) {
            existing.refresh_activity();
            return Some(Arc::clone(existing.value()));
        }

        let mut is_new = false;
        let session = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| {
                is_new = true;
                Arc::new(UserSession::new(identity, self.settings.clone()))
            })
            .clone();
        session.refresh_activity();

        if is_new {
            let _span = tracing::info_span!("zcc.session.create", identity = %identity).entered();
            tracing::info!(total = self.sessions.len(), "created session");
        }
        Some(session)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut rows: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| SessionSummary {
                identity: entry.key().clone(),
                idle_secs: entry.value().idle().as_secs_f64(),
                subject: entry.value().current_subject(),
            })
            .collect();
        rows.sort_by(|a, b| a.identity.cmp(&b.identity));
        rows
    }

    /// Remove every session idle beyond the threshold. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let _span = tracing::info_span!(
            "zcc.session.evict",
            threshold_secs = self.idle_threshold.as_secs()
        )
        .entered();

        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle() > self.idle_threshold)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for identity in stale {
            // Re-check under the shard lock: a lookup may have refreshed it.
            if self
                .sessions
                .remove_if(&identity, |_, s| s.idle() > self.idle_threshold)
                .is_some()
            {
                tracing::info!(identity = %identity, "evicted idle session");
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, remaining = self.sessions.len(), "idle sweep completed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let with_data = self
            .sessions
            .iter()
            .filter(|entry| entry.value().data().is_some())
            .count();
        RegistryStats {
            total: self.sessions.len(),
            with_data,
        }
    }
}

/// Spawn a background task that evicts idle sessions every `interval`.
pub fn spawn_eviction_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    if interval.is_zero() {
        tracing::warn!("zero eviction interval, sweeping every millisecond instead");
    }
    let interval = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("session eviction task shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    registry.evict_idle();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: Duration) -> SessionRegistry {
        SessionRegistry::new(threshold, SessionSettings::default())
    }

    #[test]
    fn same_identity_same_session() {
        let reg = registry(Duration::from_secs(3600));
        let a = reg.get_session("alice").unwrap();
        let b = reg.get_session("alice").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn empty_identity_rejected() {
        let reg = registry(Duration::from_secs(3600));
        assert!(reg.get_session("").is_none());
        assert!(reg.get_session("   ").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn lookup_refreshes_activity() {
        let reg = registry(Duration::from_secs(3600));
        let s = reg.get_session("alice").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        let before = s.idle();
        reg.get_session("alice");
        assert!(s.idle() < before);
    }

    #[test]
    fn evicts_only_idle_sessions() {
        let reg = registry(Duration::from_millis(30));
        reg.get_session("old");
        std::thread::sleep(Duration::from_millis(60));
        reg.get_session("fresh");

        assert_eq!(reg.evict_idle(), 1);
        let left: Vec<String> = reg.list_sessions().into_iter().map(|s| s.identity).collect();
        assert_eq!(left, vec!["fresh".to_string()]);
    }

    #[test]
    fn list_is_a_snapshot() {
        let reg = registry(Duration::from_secs(3600));
        reg.get_session("b");
        reg.get_session("a");
        let rows = reg.list_sessions();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].identity, "a");
        assert!(rows[0].subject.is_none());
        assert_eq!(reg.stats().total, 2);
        assert_eq!(reg.stats().with_data, 0);
    }

    #[tokio::test]
    async fn eviction_task_stops_on_cancel() {
        let reg = Arc::new(registry(Duration::ZERO));
        reg.get_session("gone");
        let cancel = CancellationToken::new();
        let handle = spawn_eviction_task(Arc::clone(&reg), Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reg.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_interval_still_sweeps() {
        let reg = Arc::new(registry(Duration::ZERO));
        reg.get_session("gone");
        let cancel = CancellationToken::new();
        let handle = spawn_eviction_task(Arc::clone(&reg), Duration::ZERO, cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(reg.is_empty());
        cancel.cancel();
        handle.await.unwrap();
    }
}
