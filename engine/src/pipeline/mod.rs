//! Streaming Execution Pipeline
//!
//! Runs one chat request end to end:
//!
//! 1. Validate the request and the caller's ownership of the application
//! 2. Acquire the session client for the application's strategy
//! 3. Append the user turn to the conversation history
//! 4. Relay generated fragments to the caller as they arrive
//! 5. Exactly one terminal action:
//!    - completed: save parsed artifacts, append the assistant turn
//!    - failed: append a failure turn, surface the error
//!    - cancelled (caller went away): nothing is appended
//!
//! The relay runs on its own task so the terminal action happens even when
//! nobody polls the stream any more.

use crate::artifacts::{ArtifactWriter, CodeParser};
use crate::db::{AppRepository, ConversationStore};
use crate::engine_error;
use crate::llm::LLMError;
use crate::secrets::scrub;
use crate::session::{SessionClient, SessionClientCache};
use futures::{Stream, StreamExt};
use sdk::errors::EngineError;
use sdk::types::{AppId, Strategy, TurnRole, UserId};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Fragments buffered between the relay task and a slow consumer
const RELAY_BUFFER: usize = 64;

/// Prefix of the history turn recorded when generation fails
pub const FAILURE_PREFIX: &str = "[generation failed] ";

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Upstream finished; the full text was persisted
    Completed { chars: usize },
    /// Upstream failed; a failure turn was persisted
    Failed,
    /// The consumer disconnected first; nothing was persisted
    Cancelled,
}

/// Live output of [`StreamExecutor::execute`].
///
/// Yields text fragments in upstream order, then ends. A failure arrives as
/// one final `Err`. Dropping it cancels the generation.
pub struct ChatStream {
    rx: mpsc::Receiver<Result<String, EngineError>>,
    task: JoinHandle<StreamOutcome>,
}

impl ChatStream {
    /// Stop consuming and return the relay task, which resolves once the
    /// terminal action has run.
    pub fn cancel(self) -> JoinHandle<StreamOutcome> {
        let ChatStream { rx, task } = self;
        drop(rx);
        task
    }

    /// Drain the stream into the concatenated text.
    pub async fn collect_text(mut self) -> Result<String, EngineError> {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }

    /// Wait for the relay task after the stream has ended.
    pub async fn outcome(self) -> StreamOutcome {
        self.cancel().await.unwrap_or(StreamOutcome::Failed)
    }
}

impl Stream for ChatStream {
    type Item = Result<String, EngineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[derive(Clone)]
pub struct StreamExecutor {
    apps: AppRepository,
    store: Arc<dyn ConversationStore>,
    cache: Arc<SessionClientCache>,
    artifacts: ArtifactWriter,
}

impl StreamExecutor {
    pub fn new(
        apps: AppRepository,
        store: Arc<dyn ConversationStore>,
        cache: Arc<SessionClientCache>,
        artifacts: ArtifactWriter,
    ) -> Self {
        Self {
            apps,
            store,
            cache,
            artifacts,
        }
    }

    /// Start a chat turn for `app_id` on behalf of `user`.
    ///
    /// Errors returned here happen before anything is appended to history,
    /// except a failed user-turn append, which is reported as `Database`.
    pub async fn execute(
        &self,
        app_id: AppId,
        message: &str,
        user: UserId,
    ) -> Result<ChatStream, EngineError> {
        app_id.validate()?;
        if message.trim().is_empty() {
            return Err(EngineError::Validation("message must not be empty".to_string()));
        }

        let app = self
            .apps
            .get(app_id)
            .await
            .map_err(engine_error)?
            .ok_or_else(|| EngineError::NotFound(format!("application {}", app_id)))?;

        if app.user_id != user {
            warn!(app_id = %app_id, user = user.0, "Chat refused for non-owner");
            return Err(EngineError::Forbidden(format!(
                "application {} belongs to another user",
                app_id
            )));
        }

        // Acquired before the user turn lands so hydration does not see it
        let client = self.cache.get(app_id, app.strategy).await?;

        self.store
            .append(app_id, TurnRole::User, message)
            .await
            .map_err(engine_error)?;

        info!(
            app_id = %app_id,
            strategy = %app.strategy,
            chars = message.chars().count(),
            "Chat turn started"
        );

        let (tx, rx) = mpsc::channel(RELAY_BUFFER);
        let relay = Relay {
            app_id,
            strategy: app.strategy,
            client,
            store: Arc::clone(&self.store),
            artifacts: self.artifacts.clone(),
        };
        let task = tokio::spawn(relay.run(message.to_string(), tx));

        Ok(ChatStream { rx, task })
    }
}

/// What the upstream did before the relay stopped
enum Upstream {
    Completed(String),
    Failed(LLMError),
    Cancelled,
}

struct Relay {
    app_id: AppId,
    strategy: Strategy,
    client: Arc<SessionClient>,
    store: Arc<dyn ConversationStore>,
    artifacts: ArtifactWriter,
}

impl Relay {
    async fn run(
        self,
        message: String,
        tx: mpsc::Sender<Result<String, EngineError>>,
    ) -> StreamOutcome {
        match self.forward(&message, &tx).await {
            Upstream::Completed(text) => {
                self.complete(&text).await;
                StreamOutcome::Completed {
                    chars: text.chars().count(),
                }
            }
            Upstream::Failed(err) => {
                let detail = scrub(&err.to_string());
                error!(app_id = %self.app_id, error = %detail, "Generation failed");
                // Live memory mirrors what a rehydrated client would replay
                let notice = format!("{}{}", FAILURE_PREFIX, detail);
                self.client.record_reply(&notice);
                self.append(&notice).await;
                let _ = tx.send(Err(EngineError::generation(detail))).await;
                StreamOutcome::Failed
            }
            Upstream::Cancelled => {
                info!(app_id = %self.app_id, "Chat stream cancelled by consumer");
                StreamOutcome::Cancelled
            }
        }
    }

    async fn forward(
        &self,
        message: &str,
        tx: &mpsc::Sender<Result<String, EngineError>>,
    ) -> Upstream {
        let started = tokio::select! {
            _ = tx.closed() => return Upstream::Cancelled,
            started = self.client.stream(message) => started,
        };
        let mut upstream = match started {
            Ok(stream) => stream,
            Err(e) => return Upstream::Failed(e),
        };

        let mut buffer = String::new();
        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Upstream::Cancelled,
                next = upstream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    buffer.push_str(&fragment);
                    if tx.send(Ok(fragment)).await.is_err() {
                        return Upstream::Cancelled;
                    }
                }
                Some(Err(e)) => return Upstream::Failed(e),
                None => return Upstream::Completed(buffer),
            }
        }
    }

    async fn complete(&self, text: &str) {
        self.client.record_reply(text);

        if !self.strategy.requires_build() {
            // A finished reply is kept even when its code cannot be saved
            let saved = match CodeParser::parse(self.strategy, text) {
                Ok(result) => self.artifacts.write(self.app_id, self.strategy, &result).await,
                Err(e) => Err(e),
            };
            match saved {
                Ok(dir) => debug!(app_id = %self.app_id, dir = %dir.display(), "Artifacts saved"),
                Err(e) => warn!(app_id = %self.app_id, error = %e, "Artifacts not saved"),
            }
        }

        self.append(text).await;
        info!(
            app_id = %self.app_id,
            chars = text.chars().count(),
            "Chat turn completed"
        );
    }

    async fn append(&self, text: &str) {
        if let Err(e) = self.store.append(self.app_id, TurnRole::Assistant, text).await {
            error!(app_id = %self.app_id, error = %format!("{:#}", e), "Assistant turn not persisted");
        }
    }
}
