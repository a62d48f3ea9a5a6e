//! Conversation Store
//!
//! Persists each orchestration exchange per user: the submitted task plus
//! the ordered per-agent results. The gateway saves after `execute`
//! completes; the orchestration core itself never touches storage.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::orchestrator::AgentResult;

/// Conversations kept per user (rolling window)
const MAX_CONVERSATIONS_PER_USER: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Internal(String),
}

/// One stored agent result row
#[derive(Debug, Clone, Serialize)]
pub struct StoredResult {
    pub agent_id: String,
    pub agent_name: String,
    pub status: String,
    pub content: String,
    pub error: Option<String>,
}

/// Listing entry for a user's history
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub task: String,
    pub created_at: i64,
    pub agent_count: usize,
}

/// Full stored exchange
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub task: String,
    pub created_at: i64,
    /// Results in the order they held in the orchestration output
    pub results: Vec<StoredResult>,
}

/// Conversation store with SQLite backend
pub struct ConversationStore {
    conn: Mutex<Connection>,
    max_per_user: usize,
}

impl ConversationStore {
    /// Open or create the conversation database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            max_per_user: MAX_CONVERSATIONS_PER_USER,
        };
        store.init_schema()?;

        info!("Conversation store opened: {}", path.display());
        Ok(store)
    }

    /// Open with a custom per-user window (tests)
    pub fn open_with_limit(path: &Path, max_per_user: usize) -> Result<Self, StoreError> {
        let mut store = Self::open(path)?;
        store.max_per_user = max_per_user;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_user
                ON conversations(user_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS agent_results (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                agent_name TEXT NOT NULL,
                status TEXT NOT NULL,
                content TEXT NOT NULL,
                error TEXT,
                PRIMARY KEY (conversation_id, position)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    /// Save one exchange; returns the new conversation id
    pub fn save(
        &self,
        user_id: &str,
        task: &str,
        results: &[AgentResult],
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().timestamp_millis();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO conversations (id, user_id, task, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, task, created_at],
        )?;

        for (position, result) in results.iter().enumerate() {
            tx.execute(
                "INSERT INTO agent_results
                 (conversation_id, position, agent_id, agent_name, status, content, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    position as i64,
                    result.agent_id,
                    result.agent_name,
                    result.status.as_str(),
                    result.content,
                    result.error,
                ],
            )?;
        }

        tx.commit()?;
        drop(conn);

        self.trim_user(user_id)?;
        debug!("Saved conversation {} for user {}", id, user_id);
        Ok(id)
    }

    /// List a user's conversations, newest first
    pub fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.task, c.created_at,
                    (SELECT COUNT(*) FROM agent_results r WHERE r.conversation_id = c.id)
             FROM conversations c
             WHERE c.user_id = ?1
             ORDER BY c.created_at DESC
             LIMIT ?2",
        )?;

        let summaries = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    task: row.get(1)?,
                    created_at: row.get(2)?,
                    agent_count: row.get::<_, i64>(3)? as usize,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(summaries)
    }

    /// Fetch one conversation, scoped to its owner
    pub fn get(&self, id: &str, user_id: &str) -> Result<Option<Conversation>, StoreError> {
        let conn = self.lock()?;

        let header = conn
            .query_row(
                "SELECT id, user_id, task, created_at FROM conversations
                 WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, user_id, task, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT agent_id, agent_name, status, content, error
             FROM agent_results
             WHERE conversation_id = ?1
             ORDER BY position",
        )?;

        let results = stmt
            .query_map(params![id], |row| {
                Ok(StoredResult {
                    agent_id: row.get(0)?,
                    agent_name: row.get(1)?,
                    status: row.get(2)?,
                    content: row.get(3)?,
                    error: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(Some(Conversation {
            id,
            user_id,
            task,
            created_at,
            results,
        }))
    }

    /// Drop a user's oldest conversations beyond the window
    fn trim_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM conversations
             WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM conversations
                 WHERE user_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2
             )",
            params![user_id, self.max_per_user as i64],
        )?;
        // Cascade does not fire without foreign_keys pragma; clean up directly
        conn.execute(
            "DELETE FROM agent_results
             WHERE conversation_id NOT IN (SELECT id FROM conversations)",
            [],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::AgentStatus;

    fn sample_result(agent_id: &str, status: AgentStatus) -> AgentResult {
        AgentResult {
            agent_id: agent_id.to_string(),
            agent_name: format!("{} Agent", agent_id),
            status,
            content: format!("output from {}", agent_id),
            sections: Vec::new(),
            error: None,
            model: "sonnet".to_string(),
            duration_ms: 10,
        }
    }

    fn temp_store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open(&dir.path().join("conv.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_and_get_preserves_order() {
        let (_dir, store) = temp_store();
        let results = vec![
            sample_result("reasoning", AgentStatus::Success),
            sample_result("writer", AgentStatus::Partial),
        ];

        let id = store.save("u-1", "Compare things", &results).unwrap();
        let loaded = store.get(&id, "u-1").unwrap().unwrap();

        assert_eq!(loaded.task, "Compare things");
        assert_eq!(loaded.results.len(), 2);
        assert_eq!(loaded.results[0].agent_id, "reasoning");
        assert_eq!(loaded.results[1].agent_id, "writer");
        assert_eq!(loaded.results[1].status, "partial");
    }

    #[test]
    fn test_user_isolation() {
        let (_dir, store) = temp_store();
        let results = vec![sample_result("reasoning", AgentStatus::Success)];

        let id = store.save("u-1", "Private task", &results).unwrap();

        assert!(store.get(&id, "u-2").unwrap().is_none());
        assert!(store.list_for_user("u-2", 10).unwrap().is_empty());
        assert_eq!(store.list_for_user("u-1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_listing_newest_first() {
        let (_dir, store) = temp_store();
        let results = vec![sample_result("planner", AgentStatus::Success)];

        store.save("u-1", "first", &results).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.save("u-1", "second", &results).unwrap();

        let listing = store.list_for_user("u-1", 10).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].task, "second");
        assert_eq!(listing[1].task, "first");
    }

    #[test]
    fn test_rolling_window_trim() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::open_with_limit(&dir.path().join("conv.db"), 2).unwrap();
        let results = vec![sample_result("critic", AgentStatus::Success)];

        for i in 0..4 {
            store.save("u-1", &format!("task {}", i), &results).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let listing = store.list_for_user("u-1", 10).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].task, "task 3");
    }
}
