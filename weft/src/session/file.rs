//! File-backed session store.
//!
//! Layout, one directory per session:
//!
//! ```text
//! <root>/sessions/session_<uuid>/
//!     session.json
//!     pattern_state.json
//!     spec_snapshot.yaml
//!     agents/<agent_id>/
//!         agent.json
//!         messages/message_<k>.json
//! ```
//!
//! Every file is written by atomic replace: serialize to a temp file in the
//! same directory, then rename. Writers across processes coordinate via a
//! per-session advisory lock file; within a process a per-session mutex
//! serializes writers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::message::Message;
use crate::pattern::state::PatternState;
use crate::session::store::{SessionStore, StoreError};
use crate::session::{Session, SessionStatus};

const LOCK_FILE: &str = ".lock";
/// Locks older than this are treated as stale leftovers of a dead process.
const LOCK_STALE: Duration = Duration::from_secs(30);

pub struct FileSessionStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("session_{}", session_id))
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn require_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.session_dir(session_id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(dir)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
    }

    async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        atomic_write(path, &bytes).await
    }
}

/// Atomic replace: temp file in the same directory, then rename.
async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Io(format!("{}: no parent", path.display())))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::Io(format!("{}: {}", dir.display(), e)))?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        uuid::Uuid::new_v4()
    ));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Io(format!("rename to {}: {}", path.display(), e)))
}

/// Cross-process advisory lock on a session directory. Best-effort: stale
/// locks are stolen after `LOCK_STALE`.
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    async fn acquire(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(LOCK_FILE);
        for _ in 0..40 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Ok(meta) = std::fs::metadata(&path) {
                        let stale = meta
                            .modified()
                            .ok()
                            .and_then(|m| m.elapsed().ok())
                            .map(|age| age > LOCK_STALE)
                            .unwrap_or(true);
                        if stale {
                            let _ = std::fs::remove_file(&path);
                            continue;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
                Err(e) => return Err(StoreError::Io(format!("{}: {}", path.display(), e))),
            }
        }
        Err(StoreError::Locked(format!(
            "could not acquire {}",
            path.display()
        )))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, session: &Session, spec_snapshot: &[u8]) -> Result<(), StoreError> {
        let lock = self.lock_for(&session.session_id);
        let _guard = lock.lock().await;
        let dir = self.session_dir(&session.session_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", dir.display(), e)))?;
        let _lock = DirLock::acquire(&dir).await?;
        atomic_write(&dir.join("spec_snapshot.yaml"), spec_snapshot).await?;
        Self::write_json(&dir.join("session.json"), session).await
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let lock = self.lock_for(&session.session_id);
        let _guard = lock.lock().await;
        let dir = self.require_dir(&session.session_id).await?;
        let _lock = DirLock::acquire(&dir).await?;
        Self::write_json(&dir.join("session.json"), session).await
    }

    async fn load(&self, session_id: &str) -> Result<Session, StoreError> {
        let dir = self.require_dir(session_id).await?;
        Self::read_json(&dir.join("session.json")).await
    }

    async fn save_pattern_state(
        &self,
        session_id: &str,
        state: &PatternState,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let dir = self.require_dir(session_id).await?;
        let _lock = DirLock::acquire(&dir).await?;
        Self::write_json(&dir.join("pattern_state.json"), state).await
    }

    async fn load_pattern_state(&self, session_id: &str) -> Result<PatternState, StoreError> {
        let dir = self.require_dir(session_id).await?;
        Self::read_json(&dir.join("pattern_state.json")).await
    }

    async fn load_spec_snapshot(&self, session_id: &str) -> Result<Vec<u8>, StoreError> {
        let dir = self.require_dir(session_id).await?;
        let path = dir.join("spec_snapshot.yaml");
        tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))
    }

    async fn save_conversation(
        &self,
        session_id: &str,
        agent: &str,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let dir = self.require_dir(session_id).await?;
        let _lock = DirLock::acquire(&dir).await?;
        let agent_dir = dir.join("agents").join(agent);
        let messages_dir = agent_dir.join("messages");
        Self::write_json(
            &agent_dir.join("agent.json"),
            &serde_json::json!({ "agent_id": agent, "message_count": messages.len() }),
        )
        .await?;
        for (k, message) in messages.iter().enumerate() {
            Self::write_json(&messages_dir.join(format!("message_{}.json", k)), message).await?;
        }
        // Compaction shrinks conversations; drop files beyond the new count.
        if let Ok(mut entries) = tokio::fs::read_dir(&messages_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(k) = name
                    .strip_prefix("message_")
                    .and_then(|s| s.strip_suffix(".json"))
                    .and_then(|s| s.parse::<usize>().ok())
                {
                    if k >= messages.len() {
                        let _ = tokio::fs::remove_file(entry.path()).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn load_conversation(
        &self,
        session_id: &str,
        agent: &str,
    ) -> Result<Option<Vec<Message>>, StoreError> {
        let dir = self.require_dir(session_id).await?;
        let agent_dir = dir.join("agents").join(agent);
        if !agent_dir.is_dir() {
            return Ok(None);
        }
        let meta: serde_json::Value = Self::read_json(&agent_dir.join("agent.json")).await?;
        let count = meta
            .get("message_count")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| StoreError::Corrupt("agent.json missing message_count".into()))?;
        let mut messages = Vec::with_capacity(count as usize);
        for k in 0..count {
            let path = agent_dir.join("messages").join(format!("message_{}.json", k));
            messages.push(Self::read_json(&path).await?);
        }
        Ok(Some(messages))
    }

    async fn list(&self, status: Option<SessionStatus>) -> Result<Vec<Session>, StoreError> {
        let sessions_dir = self.sessions_dir();
        if !sessions_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&sessions_dir)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", sessions_dir.display(), e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let session_file = entry.path().join("session.json");
            if !session_file.is_file() {
                continue;
            }
            match Self::read_json::<Session>(&session_file).await {
                Ok(session) => {
                    if status.map_or(true, |wanted| session.metadata.status == wanted) {
                        sessions.push(session);
                    }
                }
                Err(e) => tracing::warn!(path = %session_file.display(), error = %e, "skipping unreadable session"),
            }
        }
        sessions.sort_by(|a, b| b.metadata.updated_at.cmp(&a.metadata.updated_at));
        Ok(sessions)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let dir = self.require_dir(session_id).await?;
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", dir.display(), e)))
    }

    async fn cleanup(
        &self,
        older_than: chrono::Duration,
        keep_completed: bool,
    ) -> Result<usize, StoreError> {
        let cutoff = chrono::Utc::now() - older_than;
        let mut removed = 0;
        for session in self.list(None).await? {
            if session.metadata.updated_at >= cutoff {
                continue;
            }
            if keep_completed && session.metadata.status == SessionStatus::Completed {
                continue;
            }
            self.delete(&session.session_id).await?;
            removed += 1;
        }
        Ok(removed)
    }
}
