//! Session persistence seam.
//!
//! Stores are keyed by session id and every read is filtered by owner: a
//! session belonging to another user is indistinguishable from a missing
//! one. Each call is atomic; serializing concurrent writers to the same
//! session is the caller's responsibility.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::session::AgentSession;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session owned by `user_id`.
    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<AgentSession>, CoreError>;

    /// Insert or replace a session.
    ///
    /// Fails with `CoreError::SessionNotFound` if the id belongs to a
    /// different user.
    async fn put(&self, session: &AgentSession) -> Result<(), CoreError>;

    /// All sessions owned by `user_id`, oldest first.
    async fn list(&self, user_id: &str) -> Result<Vec<AgentSession>, CoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, AgentSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<AgentSession>, CoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&id)
            .filter(|session| session.user_id() == user_id)
            .cloned())
    }

    async fn put(&self, session: &AgentSession) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&session.id())
            && existing.user_id() != session.user_id()
        {
            return Err(CoreError::SessionNotFound(session.id()));
        }
        sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<AgentSession>, CoreError> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<AgentSession> = sessions
            .values()
            .filter(|session| session.user_id() == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(AgentSession::created_at);
        Ok(owned)
    }
}

/// Store keeping one JSON document per session under a root directory.
///
/// Writes go to a temporary file that is then renamed over the target, so a
/// reader never observes a half-written session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn read(&self, path: &Path) -> Result<Option<AgentSession>, CoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse session file {}", path.display()))?;
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    #[instrument(skip(self))]
    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<AgentSession>, CoreError> {
        let session = self.read(&self.session_path(id)).await?;
        Ok(session.filter(|session| session.user_id() == user_id))
    }

    #[instrument(skip_all, fields(id = %session.id()))]
    async fn put(&self, session: &AgentSession) -> Result<(), CoreError> {
        let path = self.session_path(session.id());
        if let Some(existing) = self.read(&path).await?
            && existing.user_id() != session.user_id()
        {
            return Err(CoreError::SessionNotFound(session.id()));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;

        let body = serde_json::to_vec_pretty(session)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;

        debug!(path = %path.display(), "session saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, user_id: &str) -> Result<Vec<AgentSession>, CoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut owned = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(Some(session)) if session.user_id() == user_id => owned.push(session),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }

        owned.sort_by_key(AgentSession::created_at);
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{NewSession, SessionState};
    use crate::state_machine::{SessionPatch, transition};

    fn session_for(user: &str) -> AgentSession {
        AgentSession::new(
            NewSession::builder()
                .user_id(user)
                .name("session")
                .goal("goal")
                .build(),
        )
    }

    async fn exercise_isolation(store: &dyn SessionStore) {
        let alice = session_for("alice");
        store.put(&alice).await.expect("should save");

        let found = store.get("alice", alice.id()).await.expect("should read");
        assert_eq!(found.as_ref(), Some(&alice));

        let hidden = store.get("mallory", alice.id()).await.expect("should read");
        assert!(hidden.is_none(), "other users must not see the session");

        let mut hijack = alice.clone();
        hijack.user_id = "mallory".to_owned();
        let err = store.put(&hijack).await.unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound(id) if id == alice.id()));

        let still = store.get("alice", alice.id()).await.expect("should read");
        assert_eq!(still.as_ref(), Some(&alice));
    }

    #[tokio::test]
    async fn test_should_isolate_sessions_by_user_in_memory() {
        exercise_isolation(&MemorySessionStore::new()).await;
    }

    #[tokio::test]
    async fn test_should_isolate_sessions_by_user_on_disk() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        exercise_isolation(&FileSessionStore::new(dir.path().join("sessions"))).await;
    }

    #[tokio::test]
    async fn test_should_replace_session_on_put() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let store = FileSessionStore::new(dir.path());

        let session = session_for("alice");
        store.put(&session).await.expect("should save");
        let planning = transition(&session, SessionState::Planning, SessionPatch::default())
            .expect("should transition");
        store.put(&planning).await.expect("should save");

        let loaded = store
            .get("alice", session.id())
            .await
            .expect("should read")
            .expect("should exist");
        assert_eq!(loaded.state(), SessionState::Planning);
        assert!(!dir.path().join(format!("{}.json.tmp", session.id())).exists());
    }

    #[tokio::test]
    async fn test_should_list_only_owned_sessions() {
        let store = MemorySessionStore::new();
        let first = session_for("alice");
        let second = session_for("alice");
        let other = session_for("bob");
        for session in [&first, &second, &other] {
            store.put(session).await.expect("should save");
        }

        let listed = store.list("alice").await.expect("should list");
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.user_id() == "alice"));
    }

    #[tokio::test]
    async fn test_should_list_nothing_for_missing_directory() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let store = FileSessionStore::new(dir.path().join("absent"));
        assert!(store.list("alice").await.expect("should list").is_empty());
        assert!(
            store
                .get("alice", Uuid::new_v4())
                .await
                .expect("should read")
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_should_skip_corrupt_files_when_listing() {
        let dir = tempfile::TempDir::new().expect("should create temp dir");
        let store = FileSessionStore::new(dir.path());
        std::fs::write(dir.path().join("broken.json"), "{not json").expect("should write");
        store.put(&session_for("alice")).await.expect("should save");

        let listed = store.list("alice").await.expect("should list");
        assert_eq!(listed.len(), 1);
    }
}
