//! Appforge Engine Library
//!
//! Turns natural-language prompts into web applications: routes each new
//! application to a generation strategy, streams generated code while
//! keeping the conversation history, writes artifacts to disk, and builds
//! and publishes them under a stable deploy key.
//!
//! Used by the `appforge` binary, the HTTP api-server and the integration
//! tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// File system security module
pub mod fs_guard;

/// Database persistence module
pub mod db;

/// LLM provider abstraction layer
pub mod llm;

/// File tools for tool-augmented generation
pub mod tools;

/// Artifact parsing, writing and packaging
pub mod artifacts;

/// Session clients and their cache
pub mod session;

/// Streaming execution pipeline
pub mod pipeline;

/// Build and deploy pipeline
pub mod deploy;

/// Application lifecycle service
pub mod apps;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;

use crate::apps::AppService;
use crate::artifacts::ArtifactWriter;
use crate::config::{Config, ModelProfile};
use crate::db::Database;
use crate::deploy::{
    ChromeScreenshotCapturer, DeployService, NpmProjectBuilder, ProjectBuilder,
    ScreenshotCapturer, ScreenshotWorker,
};
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::StrategyRouter;
use crate::llm::LLMProvider;
use crate::pipeline::StreamExecutor;
use crate::secrets::SecretManager;
use crate::session::cache::CachePolicy;
use crate::session::{DefaultSessionFactory, SessionClientCache};
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Keychain service name for stored secrets
pub const SECRET_SERVICE: &str = "appforge";

/// Model backends, one per profile
#[derive(Clone)]
pub struct Providers {
    /// Structured single-document and multi-file generation
    pub chat: Arc<dyn LLMProvider>,
    /// Tool-augmented project generation
    pub reasoning: Arc<dyn LLMProvider>,
    /// Strategy classification
    pub routing: Arc<dyn LLMProvider>,
}

/// The wired engine: storage, session cache, pipelines and services.
///
/// Constructed once per process and shut down explicitly.
pub struct Engine {
    config: Config,
    database: Database,
    cache: Arc<SessionClientCache>,
    sweeper: JoinHandle<()>,
    pipeline: StreamExecutor,
    deploy: DeployService,
    apps: AppService,
}

impl Engine {
    /// Build the engine from configuration: OpenAI-compatible providers,
    /// the npm builder and, when enabled, headless Chrome covers.
    pub async fn bootstrap(config: Config) -> Result<Self, EngineError> {
        let api_key = match SecretManager::new(SECRET_SERVICE).get_secret(&config.llm.api_key_name) {
            Ok(key) => Some(key),
            Err(e) => {
                // Commands that never reach the model still work
                warn!("Model API key unavailable: {}", e);
                None
            }
        };

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let timeout = Duration::from_secs(config.llm.request_timeout_secs);
        let provider = |profile: &ModelProfile| -> Arc<dyn LLMProvider> {
            Arc::new(OpenAIProvider::new(
                http.clone(),
                config.llm.base_url.clone(),
                api_key.clone(),
                profile.clone(),
                timeout,
            ))
        };
        let providers = Providers {
            chat: provider(&config.llm.chat),
            reasoning: provider(&config.llm.reasoning),
            routing: provider(&config.llm.routing),
        };

        let builder = Arc::new(NpmProjectBuilder::new(
            config.deploy.npm_binary.clone(),
            Duration::from_secs(config.deploy.install_timeout_secs),
            Duration::from_secs(config.deploy.build_timeout_secs),
        ));

        let capturer: Option<Arc<dyn ScreenshotCapturer>> = if config.screenshot.enabled {
            Some(Arc::new(ChromeScreenshotCapturer::new(
                config.screenshot.chrome_binary.clone(),
                config.storage.screenshot_dir.clone(),
                Duration::from_secs(config.screenshot.timeout_secs),
                config.screenshot.public_base_url.clone(),
            )))
        } else {
            None
        };

        Self::assemble(config, providers, builder, capturer).await
    }

    /// Wire the engine around explicit collaborators.
    pub async fn assemble(
        config: Config,
        providers: Providers,
        builder: Arc<dyn ProjectBuilder>,
        capturer: Option<Arc<dyn ScreenshotCapturer>>,
    ) -> Result<Self, EngineError> {
        let database = Database::new(&config.storage.database)
            .await
            .map_err(engine_error)?;
        let apps_repo = database.apps();
        let history = database.history();
        let artifacts = ArtifactWriter::new(config.storage.code_output_dir.clone());

        let factory = Arc::new(DefaultSessionFactory::new(
            Arc::new(history.clone()),
            Arc::clone(&providers.chat),
            Arc::clone(&providers.reasoning),
            artifacts.clone(),
            &config.session,
        ));
        let cache = Arc::new(SessionClientCache::new(
            factory,
            CachePolicy::from(&config.session),
        ));
        let sweeper = cache.spawn_sweeper(config.session.sweep_interval());

        let pipeline = StreamExecutor::new(
            apps_repo.clone(),
            Arc::new(history.clone()),
            Arc::clone(&cache),
            artifacts.clone(),
        );

        let screenshots = capturer.map(|capturer| {
            ScreenshotWorker::new(capturer, apps_repo.clone(), config.screenshot.workers)
        });
        let deploy = DeployService::new(
            apps_repo.clone(),
            artifacts.clone(),
            config.storage.deploy_dir.clone(),
            config.deploy.host.clone(),
            builder,
            screenshots,
        );

        let apps = AppService::new(
            apps_repo,
            history,
            StrategyRouter::new(Arc::clone(&providers.routing)),
            Arc::clone(&cache),
            artifacts,
        );

        info!(
            data_dir = %config.core.data_dir.display(),
            chat_model = providers.chat.model(),
            reasoning_model = providers.reasoning.model(),
            "Engine ready"
        );

        Ok(Self {
            config,
            database,
            cache,
            sweeper,
            pipeline,
            deploy,
            apps,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn sessions(&self) -> &Arc<SessionClientCache> {
        &self.cache
    }

    pub fn pipeline(&self) -> &StreamExecutor {
        &self.pipeline
    }

    pub fn deployer(&self) -> &DeployService {
        &self.deploy
    }

    pub fn apps(&self) -> &AppService {
        &self.apps
    }

    /// Drain the session cache, stop the sweeper and close the database.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let drained = self.cache.drain();
        self.sweeper.abort();
        self.database.close().await.map_err(engine_error)?;
        info!(sessions = drained, "Engine stopped");
        Ok(())
    }
}

/// Convert an internal error into the boundary taxonomy.
///
/// An `EngineError` carried inside the chain is returned as is; anything else
/// is a storage failure.
pub(crate) fn engine_error(err: anyhow::Error) -> EngineError {
    match err.downcast::<EngineError>() {
        Ok(e) => e,
        Err(other) => EngineError::Database(format!("{:#}", other)),
    }
}

/// Whether the model API key resolves from the environment or keychain
pub fn has_api_key(config: &Config) -> bool {
    SecretManager::new(SECRET_SERVICE)
        .get_secret(&config.llm.api_key_name)
        .is_ok_and(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_engine_error_keeps_typed_errors() {
        let err = anyhow::Error::from(EngineError::NotFound("app 1".to_string()))
            .context("loading app");
        assert!(matches!(engine_error(err), EngineError::NotFound(_)));

        let err = Err::<(), _>(std::io::Error::other("disk gone"))
            .context("writing row")
            .unwrap_err();
        match engine_error(err) {
            EngineError::Database(msg) => assert!(msg.contains("writing row: disk gone")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
