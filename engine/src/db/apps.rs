/// Application record persistence
///
/// An application row carries the generation strategy chosen at creation and
/// the deploy key, which is written once and reused by every later deploy.
use anyhow::{Context, Result};
use sdk::types::{AppId, Strategy, UserId};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::now_millis;

/// Application record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub id: AppId,
    pub user_id: UserId,
    pub name: String,
    pub init_prompt: String,
    pub strategy: Strategy,
    pub deploy_key: Option<String>,
    pub deployed_at: Option<i64>,
    pub cover: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AppRecord {
    fn from_row(r: &SqliteRow) -> Result<Self> {
        let strategy: String = r.get("strategy");
        Ok(Self {
            id: AppId(r.get("id")),
            user_id: UserId(r.get("user_id")),
            name: r.get("name"),
            init_prompt: r.get("init_prompt"),
            strategy: strategy.parse()?,
            deploy_key: r.get("deploy_key"),
            deployed_at: r.get("deployed_at"),
            cover: r.get("cover"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }
}

/// Application repository for database operations
#[derive(Clone)]
pub struct AppRepository {
    pool: SqlitePool,
}

const SELECT_APP: &str = "SELECT id, user_id, name, init_prompt, strategy, deploy_key, deployed_at, cover, created_at, updated_at FROM apps";

impl AppRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new application and return the stored record
    pub async fn create(
        &self,
        user_id: UserId,
        name: &str,
        init_prompt: &str,
        strategy: Strategy,
    ) -> Result<AppRecord> {
        let now = now_millis()?;

        let result = sqlx::query(
            "INSERT INTO apps (user_id, name, init_prompt, strategy, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id.0)
        .bind(name)
        .bind(init_prompt)
        .bind(strategy.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to create app")?;

        Ok(AppRecord {
            id: AppId(result.last_insert_rowid()),
            user_id,
            name: name.to_string(),
            init_prompt: init_prompt.to_string(),
            strategy,
            deploy_key: None,
            deployed_at: None,
            cover: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get an application by ID
    pub async fn get(&self, app_id: AppId) -> Result<Option<AppRecord>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_APP))
            .bind(app_id.0)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch app")?;

        row.as_ref().map(AppRecord::from_row).transpose()
    }

    /// Most recently created applications of a user
    pub async fn list_by_user(&self, user_id: UserId, limit: i64) -> Result<Vec<AppRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            SELECT_APP
        ))
        .bind(user_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list apps")?;

        rows.iter().map(AppRecord::from_row).collect()
    }

    /// Store `candidate` as the deploy key unless one is already set.
    ///
    /// Returns the key stored afterwards, so two concurrent first deploys
    /// converge on the same key. Returns `None` when `candidate` is already
    /// taken by another application; the caller picks a new candidate.
    pub async fn assign_deploy_key(&self, app_id: AppId, candidate: &str) -> Result<Option<String>> {
        let now = now_millis()?;

        let update = sqlx::query(
            "UPDATE apps SET deploy_key = ?, updated_at = ? WHERE id = ? AND deploy_key IS NULL",
        )
        .bind(candidate)
        .bind(now)
        .bind(app_id.0)
        .execute(&self.pool)
        .await;

        match update {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to assign deploy key"),
        }

        let stored = sqlx::query_scalar::<_, Option<String>>("SELECT deploy_key FROM apps WHERE id = ?")
            .bind(app_id.0)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read deploy key")?
            .flatten();

        stored
            .map(Some)
            .with_context(|| format!("App {} disappeared while assigning deploy key", app_id))
    }

    /// Record a successful publish
    pub async fn mark_deployed(&self, app_id: AppId) -> Result<i64> {
        let now = now_millis()?;

        sqlx::query("UPDATE apps SET deployed_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .context("Failed to mark app deployed")?;

        Ok(now)
    }

    /// Update the cover image reference
    pub async fn set_cover(&self, app_id: AppId, cover: &str) -> Result<()> {
        let now = now_millis()?;

        sqlx::query("UPDATE apps SET cover = ?, updated_at = ? WHERE id = ?")
            .bind(cover)
            .bind(now)
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .context("Failed to update cover")?;

        Ok(())
    }

    /// Delete an application; its history goes with it through the foreign key
    pub async fn delete(&self, app_id: AppId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM apps WHERE id = ?")
            .bind(app_id.0)
            .execute(&self.pool)
            .await
            .context("Failed to delete app")?;

        Ok(result.rows_affected() > 0)
    }
}
