//! Application lifecycle
//!
//! Creation (with strategy routing), deletion, history paging and archive
//! download. Every operation on an existing application is owner-only.

use crate::artifacts::{archive, ArtifactWriter};
use crate::db::{AppRecord, AppRepository, ChatHistoryRepository, ConversationTurn, HistoryCursor};
use crate::engine_error;
use crate::llm::router::StrategyRouter;
use crate::session::SessionClientCache;
use sdk::errors::EngineError;
use sdk::types::{AppId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

/// Characters of the initial prompt used as the application name
pub const NAME_CHARS: usize = 12;

/// Largest history page a caller may request
pub const MAX_PAGE_SIZE: i64 = 50;

/// Applications listed per user
const LIST_LIMIT: i64 = 100;

pub struct AppService {
    apps: AppRepository,
    history: ChatHistoryRepository,
    router: StrategyRouter,
    cache: Arc<SessionClientCache>,
    artifacts: ArtifactWriter,
}

impl AppService {
    pub fn new(
        apps: AppRepository,
        history: ChatHistoryRepository,
        router: StrategyRouter,
        cache: Arc<SessionClientCache>,
        artifacts: ArtifactWriter,
    ) -> Self {
        Self {
            apps,
            history,
            router,
            cache,
            artifacts,
        }
    }

    /// Route `init_prompt` and store a new application.
    ///
    /// Nothing is written when routing fails.
    pub async fn create_app(&self, user: UserId, init_prompt: &str) -> Result<AppRecord, EngineError> {
        let prompt = init_prompt.trim();
        if prompt.is_empty() {
            return Err(EngineError::Validation("initial prompt must not be empty".to_string()));
        }

        let strategy = self.router.route(prompt).await?;
        let name: String = prompt.chars().take(NAME_CHARS).collect();

        let app = self
            .apps
            .create(user, &name, prompt, strategy)
            .await
            .map_err(engine_error)?;

        info!(app_id = %app.id, strategy = %strategy, user = user.0, "Application created");
        Ok(app)
    }

    /// Owned application, or `NotFound` / `Forbidden`
    pub async fn get_app(&self, app_id: AppId, user: UserId) -> Result<AppRecord, EngineError> {
        app_id.validate()?;

        let app = self
            .apps
            .get(app_id)
            .await
            .map_err(engine_error)?
            .ok_or_else(|| EngineError::NotFound(format!("application {}", app_id)))?;

        if app.user_id != user {
            warn!(app_id = %app_id, user = user.0, "Access refused for non-owner");
            return Err(EngineError::Forbidden(format!(
                "application {} belongs to another user",
                app_id
            )));
        }

        Ok(app)
    }

    /// Applications of `user`, newest first
    pub async fn list_apps(&self, user: UserId) -> Result<Vec<AppRecord>, EngineError> {
        self.apps
            .list_by_user(user, LIST_LIMIT)
            .await
            .map_err(engine_error)
    }

    /// Delete an application, its history and its cached session clients.
    ///
    /// Generated files and deploys stay on disk.
    pub async fn delete_app(&self, app_id: AppId, user: UserId) -> Result<(), EngineError> {
        self.get_app(app_id, user).await?;

        let turns = self
            .history
            .delete_by_app(app_id)
            .await
            .map_err(engine_error)?;
        self.apps.delete(app_id).await.map_err(engine_error)?;
        let evicted = self.cache.evict_app(app_id);

        info!(app_id = %app_id, turns, evicted, "Application deleted");
        Ok(())
    }

    /// One page of history, newest first.
    ///
    /// `before` is the cursor of the last turn of the previous page.
    pub async fn list_history(
        &self,
        app_id: AppId,
        user: UserId,
        page_size: i64,
        before: Option<HistoryCursor>,
    ) -> Result<Vec<ConversationTurn>, EngineError> {
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(EngineError::Validation(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        self.get_app(app_id, user).await?;

        self.history
            .list_page(app_id, page_size, before)
            .await
            .map_err(engine_error)
    }

    /// Zip the current artifact directory. Returns the file name and bytes.
    pub async fn download_archive(
        &self,
        app_id: AppId,
        user: UserId,
    ) -> Result<(String, Vec<u8>), EngineError> {
        let app = self.get_app(app_id, user).await?;

        if !self.artifacts.has_artifacts(app_id, app.strategy) {
            return Err(EngineError::NotFound(format!(
                "no generated code for application {}",
                app_id
            )));
        }

        let dir = self.artifacts.app_dir(app_id, app.strategy);
        let bytes = tokio::task::spawn_blocking(move || archive::zip_directory(&dir))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?
            .map_err(|e| EngineError::Io(std::io::Error::other(format!("{:#}", e))))?;

        info!(app_id = %app_id, bytes = bytes.len(), "Archive built");
        Ok((format!("{}.zip", app.strategy.artifact_dir_name(app_id)), bytes))
    }
}
