/// Conversation history persistence
///
/// History is append-only. Replay order is creation time, with the row id
/// breaking ties between turns stored in the same millisecond.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::types::{AppId, TurnRole};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::now_millis;

/// One stored conversation turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub id: i64,
    pub app_id: AppId,
    pub role: TurnRole,
    pub message: String,
    pub created_at: i64,
}

impl ConversationTurn {
    fn from_row(r: &SqliteRow) -> Result<Self> {
        let role: String = r.get("role");
        Ok(Self {
            id: r.get("id"),
            app_id: AppId(r.get("app_id")),
            role: role.parse()?,
            message: r.get("message"),
            created_at: r.get("created_at"),
        })
    }
}

/// Exclusive paging position: the last turn of the previous page.
///
/// Turns stored in the same millisecond are ordered by id, so both fields are
/// needed to resume without skipping any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    pub created_at: i64,
    pub id: i64,
}

impl HistoryCursor {
    /// Cursor from request parameters. Without an id every turn of the
    /// `created_at` millisecond is excluded.
    pub fn from_parts(before: Option<i64>, before_id: Option<i64>) -> Option<Self> {
        before.map(|created_at| Self {
            created_at,
            id: before_id.unwrap_or(i64::MIN),
        })
    }
}

impl ConversationTurn {
    /// Cursor that resumes paging after this turn
    pub fn cursor(&self) -> HistoryCursor {
        HistoryCursor {
            created_at: self.created_at,
            id: self.id,
        }
    }
}

/// Durable, append-only log of conversation turns per application.
///
/// The streaming pipeline writes through this trait and session clients
/// hydrate from it, so tests can substitute a recording store.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one turn
    async fn append(&self, app_id: AppId, role: TurnRole, text: &str) -> Result<ConversationTurn>;

    /// Up to `limit` most recent turns, oldest first
    async fn load_recent(&self, app_id: AppId, limit: usize) -> Result<Vec<ConversationTurn>>;
}

/// SQLite-backed conversation store
#[derive(Clone)]
pub struct ChatHistoryRepository {
    pool: SqlitePool,
}

impl ChatHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// One page of turns, newest first.
    ///
    /// Pass the cursor of the last turn of the previous page to continue.
    pub async fn list_page(
        &self,
        app_id: AppId,
        page_size: i64,
        before: Option<HistoryCursor>,
    ) -> Result<Vec<ConversationTurn>> {
        let cursor = before.unwrap_or(HistoryCursor {
            created_at: i64::MAX,
            id: i64::MAX,
        });
        let rows = sqlx::query(
            "SELECT id, app_id, role, message, created_at FROM chat_history \
             WHERE app_id = ? AND (created_at < ? OR (created_at = ? AND id < ?)) \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(app_id.0)
        .bind(cursor.created_at)
        .bind(cursor.created_at)
        .bind(cursor.id)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch history page")?;

        rows.iter().map(ConversationTurn::from_row).collect()
    }

    /// Bulk delete, used when the owning application is deleted
    pub async fn delete_by_app(&self, app_id: AppId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chat_history WHERE app_id = ?")
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .context("Failed to delete history")?;

        Ok(result.rows_affected())
    }

    pub async fn count(&self, app_id: AppId) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chat_history WHERE app_id = ?")
            .bind(app_id.0)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count history")
    }
}

#[async_trait]
impl ConversationStore for ChatHistoryRepository {
    async fn append(&self, app_id: AppId, role: TurnRole, text: &str) -> Result<ConversationTurn> {
        let now = now_millis()?;

        let result = sqlx::query(
            "INSERT INTO chat_history (app_id, role, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(app_id.0)
        .bind(role.as_str())
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to append {} turn", role.as_str()))?;

        Ok(ConversationTurn {
            id: result.last_insert_rowid(),
            app_id,
            role,
            message: text.to_string(),
            created_at: now,
        })
    }

    async fn load_recent(&self, app_id: AppId, limit: usize) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            "SELECT id, app_id, role, message, created_at FROM chat_history \
             WHERE app_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(app_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent history")?;

        let mut turns = rows
            .iter()
            .map(ConversationTurn::from_row)
            .collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }
}
