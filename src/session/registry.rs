//! Process-wide registry of live sessions

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::session::{SessionOutcome, SessionSnapshot, StreamSession};
use crate::error::SessionError;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryCounters {
    pub sessions_started: u64,
    pub sessions_finished: u64,
    pub sessions_exhausted: u64,
}

/// Aggregate view over every live session
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub active_sessions: usize,
    pub counters: RegistryCounters,
    pub chunks_sent: u64,
    pub chunks_decoded: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<StreamSession>>,
    counters: Mutex<RegistryCounters>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<StreamSession>) {
        tracing::debug!("Registering session {}", session.id());
        self.sessions.insert(session.id(), session);
        self.counters.lock().sessions_started += 1;
    }

    /// Remove a finished session and account for how it ended
    pub fn complete(&self, id: Uuid, outcome: &SessionOutcome) -> Option<Arc<StreamSession>> {
        let (_, session) = self.sessions.remove(&id)?;
        let mut counters = self.counters.lock();
        counters.sessions_finished += 1;
        if matches!(outcome, Err(SessionError::Exhausted { .. })) {
            counters.sessions_exhausted += 1;
        }
        Some(session)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<StreamSession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots of every live session, oldest first
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.started_at);
        snapshots
    }

    pub fn status(&self) -> RegistryStatus {
        let snapshots = self.snapshots();
        RegistryStatus {
            active_sessions: snapshots.len(),
            counters: self.counters.lock().clone(),
            chunks_sent: snapshots.iter().map(|s| s.counters.chunks_sent).sum(),
            chunks_decoded: snapshots.iter().map(|s| s.counters.chunks_decoded).sum(),
            bytes_sent: snapshots.iter().map(|s| s.network.bytes_sent).sum(),
            bytes_received: snapshots.iter().map(|s| s.network.bytes_received).sum(),
        }
    }

    /// Stop every registered session
    pub async fn stop_all(&self) {
        let sessions: Vec<Arc<StreamSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            session.stop().await;
            let outcome = session.wait().await;
            self.complete(session.id(), &outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::network::memory_pair;

    fn session() -> Arc<StreamSession> {
        let (client, _server) = memory_pair(4);
        Arc::new(StreamSession::inbound(AppConfig::default(), client))
    }

    #[test]
    fn test_register_and_complete() {
        let registry = SessionRegistry::new();
        let a = session();
        let b = session();
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(&a.id()).is_some());
        assert_eq!(registry.snapshots().len(), 2);

        registry.complete(a.id(), &Ok(()));
        registry.complete(b.id(), &Err(SessionError::Exhausted { attempts: 5 }));
        assert!(registry.complete(b.id(), &Ok(())).is_none());

        let status = registry.status();
        assert_eq!(status.active_sessions, 0);
        assert_eq!(status.counters.sessions_started, 2);
        assert_eq!(status.counters.sessions_finished, 2);
        assert_eq!(status.counters.sessions_exhausted, 1);
    }

    #[tokio::test]
    async fn test_stop_all_empties_registry() {
        let registry = SessionRegistry::new();
        let s = session();
        s.start().unwrap();
        registry.register(s);

        registry.stop_all().await;
        assert!(registry.is_empty());
    }
}
