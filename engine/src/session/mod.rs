//! Session clients
//!
//! A session client is the per-(application, strategy) conversational handle
//! the pipeline streams from. It owns a bounded chat memory hydrated from the
//! persisted history, and one of two generation flavours:
//!
//! - **Structured**: one streamed completion whose text carries the code in
//!   fenced blocks (single document, multi-file).
//! - **Tool-augmented**: an iterative loop where the model edits the project
//!   directory through the file tools until it answers in plain text.
//!
//! Clients are shared through [`SessionClientCache`] and may serve several
//! requests at once; the memory sits behind a short-lived lock.

pub mod cache;
pub mod memory;

pub use cache::{DefaultSessionFactory, SessionClientCache, SessionClientFactory};
pub use memory::ChatMemory;

use crate::llm::{LLMError, LLMProvider, LLMResponse, Message, TokenStream};
use crate::tools::ToolRegistry;
use futures::StreamExt;
use sdk::types::{AppId, Strategy};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Buffered fragments between the tool loop and the consumer
const TOOL_STREAM_BUFFER: usize = 32;

/// Instructions for the single document strategy
pub const SINGLE_DOCUMENT_PROMPT: &str = "You are a front-end developer who builds complete web pages. \
Answer every request with ONE self-contained HTML document inside a single ```html fenced block. \
Put all CSS in a <style> element and all JavaScript in a <script> element. \
Do not reference external files other than public CDNs. \
You may add one or two short sentences before the code block; never after it.";

/// Instructions for the multi-file strategy
pub const MULTI_FILE_PROMPT: &str = "You are a front-end developer who builds web pages as three files. \
Answer every request with exactly three fenced blocks in this order: ```html, ```css and ```js. \
The HTML must link the stylesheet as style.css and the script as script.js. \
Always return the full content of all three files, even when only one changes. \
You may add one or two short sentences before the code blocks; never after them.";

/// How a client produces its answer
enum Flavor {
    Structured {
        provider: Arc<dyn LLMProvider>,
    },
    ToolAugmented {
        provider: Arc<dyn LLMProvider>,
        tools: Arc<ToolRegistry>,
        max_tool_calls: usize,
    },
}

/// Conversational generation handle for one application and strategy
pub struct SessionClient {
    app_id: AppId,
    strategy: Strategy,
    memory: Mutex<ChatMemory>,
    flavor: Flavor,
}

impl SessionClient {
    /// Client that streams one completion per request
    pub fn structured(
        app_id: AppId,
        strategy: Strategy,
        provider: Arc<dyn LLMProvider>,
        memory: ChatMemory,
    ) -> Self {
        Self {
            app_id,
            strategy,
            memory: Mutex::new(memory),
            flavor: Flavor::Structured { provider },
        }
    }

    /// Client that runs the tool loop against `tools`
    pub fn tool_augmented(
        app_id: AppId,
        provider: Arc<dyn LLMProvider>,
        tools: Arc<ToolRegistry>,
        memory: ChatMemory,
        max_tool_calls: usize,
    ) -> Self {
        Self {
            app_id,
            strategy: Strategy::ToolBuiltProject,
            memory: Mutex::new(memory),
            flavor: Flavor::ToolAugmented {
                provider,
                tools,
                max_tool_calls,
            },
        }
    }

    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn is_tool_augmented(&self) -> bool {
        matches!(self.flavor, Flavor::ToolAugmented { .. })
    }

    /// Snapshot of what the next request would send, system prompt first
    pub fn memory_snapshot(&self) -> Vec<Message> {
        self.memory().messages()
    }

    /// Start generating a reply to `user_message`.
    ///
    /// The message is added to memory before the request goes out. Dropping
    /// the returned stream cancels the generation.
    pub async fn stream(&self, user_message: &str) -> crate::llm::Result<TokenStream> {
        let transcript = {
            let mut memory = self.memory();
            memory.add(Message::user(user_message));
            memory.messages()
        };

        match &self.flavor {
            Flavor::Structured { provider } => {
                debug!(
                    app_id = %self.app_id,
                    model = provider.model(),
                    messages = transcript.len(),
                    "Starting structured generation"
                );
                provider.generate_stream(&transcript).await
            }
            Flavor::ToolAugmented {
                provider,
                tools,
                max_tool_calls,
            } => {
                let (tx, rx) = mpsc::channel(TOOL_STREAM_BUFFER);
                tokio::spawn(run_tool_loop(
                    self.app_id,
                    Arc::clone(provider),
                    Arc::clone(tools),
                    transcript,
                    *max_tool_calls,
                    tx,
                ));

                Ok(futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed())
            }
        }
    }

    /// Record the reply, or the failure notice stored in its place, so the
    /// next turn sees it.
    pub fn record_reply(&self, reply: &str) {
        self.memory().add(Message::assistant(reply));
    }

    fn memory(&self) -> MutexGuard<'_, ChatMemory> {
        // A panic while holding the lock cannot leave the window half-updated
        self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drive the model through tool calls until it answers in plain text.
///
/// Each executed call is announced on the stream as one `[tool] name target`
/// line. The loop stops as soon as the receiver is gone.
async fn run_tool_loop(
    app_id: AppId,
    provider: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    mut transcript: Vec<Message>,
    max_tool_calls: usize,
    tx: mpsc::Sender<crate::llm::Result<String>>,
) {
    let mut calls = 0usize;

    loop {
        let response = tokio::select! {
            _ = tx.closed() => {
                info!(app_id = %app_id, calls, "Tool loop cancelled");
                return;
            }
            response = provider.generate(&transcript) => response,
        };

        let call = match response {
            Ok(LLMResponse::FinalAnswer(answer)) => {
                debug!(app_id = %app_id, calls, "Tool loop finished");
                let _ = tx.send(Ok(answer.content)).await;
                return;
            }
            Ok(LLMResponse::ToolCall(call)) => call,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        if calls >= max_tool_calls {
            warn!(app_id = %app_id, limit = max_tool_calls, "Tool call limit reached");
            let _ = tx.send(Err(LLMError::ToolCallLimitExceeded(max_tool_calls))).await;
            return;
        }
        calls += 1;

        let notice = format!("[tool] {}\n", describe_call(&call.name, &call.arguments));
        if tx.send(Ok(notice)).await.is_err() {
            info!(app_id = %app_id, calls, "Tool loop cancelled");
            return;
        }

        let arguments: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
        transcript.push(Message::assistant(
            serde_json::json!({ "function": &call.name, "arguments": arguments }).to_string(),
        ));

        let result = tools.dispatch(&call.name, &call.arguments).await;
        transcript.push(Message::tool_result(result, &call.id));
    }
}

/// `write_file src/App.vue`, or just the name when there is no path
fn describe_call(name: &str, arguments: &str) -> String {
    let path = serde_json::from_str::<serde_json::Value>(arguments)
        .ok()
        .and_then(|v| v.get("path").and_then(|p| p.as_str()).map(String::from));

    match path {
        Some(path) if !path.is_empty() => format!("{} {}", name, path),
        _ => name.to_string(),
    }
}
