//! Durable session directory.
//!
//! Maps each `(user_id, assistant_id)` pair to at most one upstream
//! conversation pointer: a thread handle or a last-response id, tagged with
//! which protocol wrote it. Pointers written under one protocol are never
//! served to the other; a reconfigured assistant simply starts over.

use crate::error::Result;
use crate::provider::Provider;
use crate::store::Store;
use chrono::Utc;
use rusqlite::params;
use std::sync::Arc;

/// Which protocol a stored pointer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Thread,
    Response,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thread => "thread",
            Self::Response => "response",
        }
    }
}

/// Session lookup and persistence for both protocols.
pub struct SessionDirectory {
    store: Store,
    provider: Arc<dyn Provider>,
}

impl SessionDirectory {
    /// Create the directory, preparing its table.
    pub fn new(store: Store, provider: Arc<dyn Provider>) -> anyhow::Result<Self> {
        let conn = store.connect()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id      INTEGER NOT NULL,
                assistant_id TEXT NOT NULL,
                kind         TEXT NOT NULL,
                pointer      TEXT,
                updated_at   TEXT NOT NULL,
                PRIMARY KEY (user_id, assistant_id)
            );
            ",
        )?;

        Ok(Self { store, provider })
    }

    /// Thread handle for the pair, creating the upstream container on first
    /// use and persisting it immediately.
    pub async fn resolve_thread(&self, user_id: i64, assistant_id: &str) -> Result<String> {
        if let Some(pointer) = self.pointer(user_id, assistant_id, SessionKind::Thread).await? {
            return Ok(pointer);
        }

        let thread_id = self.provider.create_thread().await?;
        tracing::info!(user_id, assistant_id, %thread_id, "Created thread for new session");
        self.put(user_id, assistant_id, SessionKind::Thread, Some(thread_id.clone()))
            .await?;
        Ok(thread_id)
    }

    /// Stored thread handle, if the pair already has one. Never creates.
    pub async fn thread_id(&self, user_id: i64, assistant_id: &str) -> Result<Option<String>> {
        self.pointer(user_id, assistant_id, SessionKind::Thread).await
    }

    /// Last stored response id for the pair. No upstream call is involved:
    /// an absent pointer IS the fresh context for response chaining.
    pub async fn last_response_id(
        &self,
        user_id: i64,
        assistant_id: &str,
    ) -> Result<Option<String>> {
        self.pointer(user_id, assistant_id, SessionKind::Response).await
    }

    /// Overwrite the stored pointer for the pair. Last writer wins.
    pub async fn update(
        &self,
        user_id: i64,
        assistant_id: &str,
        kind: SessionKind,
        pointer: &str,
    ) -> Result<()> {
        self.put(user_id, assistant_id, kind, Some(pointer.to_string())).await
    }

    /// Clear a response-chaining pointer so the next turn starts a fresh
    /// context. Clearing an absent session is a no-op that succeeds.
    pub async fn reset(&self, user_id: i64, assistant_id: &str) -> Result<()> {
        self.put(user_id, assistant_id, SessionKind::Response, None).await
    }

    /// Stored pointer for the pair iff the stored kind matches.
    async fn pointer(
        &self,
        user_id: i64,
        assistant_id: &str,
        kind: SessionKind,
    ) -> Result<Option<String>> {
        let assistant_id = assistant_id.to_string();
        self.store
            .call(move |conn| {
                let result = conn.query_row(
                    "SELECT kind, pointer FROM sessions WHERE user_id = ?1 AND assistant_id = ?2",
                    params![user_id, assistant_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                );
                match result {
                    Ok((stored_kind, pointer)) if stored_kind == kind.as_str() => Ok(pointer),
                    Ok(_) => Ok(None),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn put(
        &self,
        user_id: i64,
        assistant_id: &str,
        kind: SessionKind,
        pointer: Option<String>,
    ) -> Result<()> {
        let assistant_id = assistant_id.to_string();
        let updated_at = Utc::now().to_rfc3339();
        self.store
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO sessions (user_id, assistant_id, kind, pointer, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(user_id, assistant_id)
                    DO UPDATE SET kind = ?3, pointer = ?4, updated_at = ?5
                    ",
                    params![user_id, assistant_id, kind.as_str(), pointer, updated_at],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::FakeProvider;
    use std::sync::atomic::Ordering;

    fn directory(dir: &tempfile::TempDir) -> (SessionDirectory, Arc<FakeProvider>) {
        let store = Store::open(dir.path().join("usher.db")).unwrap();
        let provider = Arc::new(FakeProvider::new());
        let directory = SessionDirectory::new(store, Arc::clone(&provider) as _).unwrap();
        (directory, provider)
    }

    #[tokio::test]
    async fn test_resolve_thread_creates_lazily_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let (directory, provider) = directory(&dir);

        let first = directory.resolve_thread(7, "asst_a").await.unwrap();
        let second = directory.resolve_thread(7, "asst_a").await.unwrap();

        assert_eq!(first, "thread_1");
        assert_eq!(second, "thread_1");
        assert_eq!(provider.created_threads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pairs_get_distinct_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (directory, provider) = directory(&dir);

        let a = directory.resolve_thread(7, "asst_a").await.unwrap();
        let b = directory.resolve_thread(7, "asst_b").await.unwrap();
        let c = directory.resolve_thread(8, "asst_a").await.unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(provider.created_threads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_response_pointer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (directory, provider) = directory(&dir);

        assert_eq!(directory.last_response_id(7, "asst_a").await.unwrap(), None);

        directory.update(7, "asst_a", SessionKind::Response, "resp_1").await.unwrap();
        assert_eq!(
            directory.last_response_id(7, "asst_a").await.unwrap().as_deref(),
            Some("resp_1")
        );

        // Last writer wins.
        directory.update(7, "asst_a", SessionKind::Response, "resp_2").await.unwrap();
        assert_eq!(
            directory.last_response_id(7, "asst_a").await.unwrap().as_deref(),
            Some("resp_2")
        );

        // No upstream traffic for any of this.
        assert!(provider.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_the_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let (directory, _provider) = directory(&dir);

        directory.update(7, "asst_a", SessionKind::Response, "resp_1").await.unwrap();
        directory.reset(7, "asst_a").await.unwrap();
        assert_eq!(directory.last_response_id(7, "asst_a").await.unwrap(), None);

        // Resetting an absent session is fine too.
        directory.reset(9, "asst_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_kind_mismatch_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let (directory, provider) = directory(&dir);

        directory.update(7, "asst_a", SessionKind::Response, "resp_1").await.unwrap();
        assert_eq!(directory.thread_id(7, "asst_a").await.unwrap(), None);

        // A thread resolve over a response-kind row starts a new thread
        // rather than serving the response id as a handle.
        let thread = directory.resolve_thread(7, "asst_a").await.unwrap();
        assert_eq!(thread, "thread_1");
        assert_eq!(provider.created_threads.load(Ordering::SeqCst), 1);

        // And the row now belongs to the thread protocol.
        assert_eq!(directory.last_response_id(7, "asst_a").await.unwrap(), None);
        assert_eq!(
            directory.thread_id(7, "asst_a").await.unwrap().as_deref(),
            Some("thread_1")
        );
    }
}
