//! SessionStore trait and the in-memory implementation for tests.
//!
//! The canonical durable backend is [`crate::session::FileSessionStore`];
//! this trait is what the engine and executors program against.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::message::Message;
use crate::pattern::state::PatternState;
use crate::session::{Session, SessionStatus};

/// Store failure classes; all map to the session exit code.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session storage: {0}")]
    Io(String),
    #[error("session encode: {0}")]
    Serialize(String),
    #[error("corrupt session record: {0}")]
    Corrupt(String),
    #[error("session locked: {0}")]
    Locked(String),
}

/// Durable persistence of sessions, pattern state, spec snapshots, and
/// per-agent conversation snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates the session directory and writes the initial records plus the
    /// verbatim spec snapshot.
    async fn create(&self, session: &Session, spec_snapshot: &[u8]) -> Result<(), StoreError>;

    /// Atomically replaces the session record.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    async fn load(&self, session_id: &str) -> Result<Session, StoreError>;

    async fn save_pattern_state(
        &self,
        session_id: &str,
        state: &PatternState,
    ) -> Result<(), StoreError>;

    async fn load_pattern_state(&self, session_id: &str) -> Result<PatternState, StoreError>;

    async fn load_spec_snapshot(&self, session_id: &str) -> Result<Vec<u8>, StoreError>;

    async fn save_conversation(
        &self,
        session_id: &str,
        agent: &str,
        messages: &[Message],
    ) -> Result<(), StoreError>;

    /// None when the agent has no snapshot yet.
    async fn load_conversation(
        &self,
        session_id: &str,
        agent: &str,
    ) -> Result<Option<Vec<Message>>, StoreError>;

    /// Sessions sorted newest-updated first, optionally filtered by status.
    async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<Session>, StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Removes sessions not updated within `older_than`; optionally preserves
    /// completed ones. Returns how many were removed.
    async fn cleanup(
        &self,
        older_than: chrono::Duration,
        keep_completed: bool,
    ) -> Result<usize, StoreError>;
}

struct MemoryRecord {
    session: Session,
    pattern_state: Option<PatternState>,
    spec_snapshot: Vec<u8>,
    conversations: HashMap<String, Vec<Message>>,
}

/// In-memory store. Not persistent; for dev and tests.
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, MemoryRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &Session, spec_snapshot: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(
            session.session_id.clone(),
            MemoryRecord {
                session: session.clone(),
                pattern_state: None,
                spec_snapshot: spec_snapshot.to_vec(),
                conversations: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&session.session_id)
            .ok_or_else(|| StoreError::NotFound(session.session_id.clone()))?;
        record.session = session.clone();
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Session, StoreError> {
        let records = self.records.read().await;
        records
            .get(session_id)
            .map(|r| r.session.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn save_pattern_state(
        &self,
        session_id: &str,
        state: &PatternState,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        record.pattern_state = Some(state.clone());
        Ok(())
    }

    async fn load_pattern_state(&self, session_id: &str) -> Result<PatternState, StoreError> {
        let records = self.records.read().await;
        records
            .get(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?
            .pattern_state
            .clone()
            .ok_or_else(|| StoreError::Corrupt("no pattern state".to_string()))
    }

    async fn load_spec_snapshot(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let records = self.records.read().await;
        records
            .get(session_id)
            .map(|r| r.spec_snapshot.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn save_conversation(
        &self,
        session_id: &str,
        agent: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        record
            .conversations
            .insert(agent.to_string(), messages.to_vec());
        Ok(())
    }

    async fn load_conversation(
        &self,
        session_id: &str,
        agent: &str,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?
            .conversations
            .get(agent)
            .cloned())
    }

    async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<Session>, StoreError> {
        let records = self.records.read().await;
        let mut sessions: Vec<Session> = records
            .values()
            .map(|r| r.session.clone())
            .filter(|s| status.map_or(true, |wanted| s.metadata.status == wanted))
            .collect();
        sessions.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn cleanup(
        &self,
        older_than: chrono::Duration,
        keep_completed: bool,
    ) -> Result<usize, StoreError> {
        let cutoff = chrono::Utc::now() - older_than;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| {
            r.session.metadata.updated_at >= cutoff
                || (keep_completed && r.session.metadata.status == SessionStatus::Completed)
        });
        Ok(before - records.len())
    }
}
