//! Generation Router
//!
//! Classifies an application's initial prompt into a generation strategy with
//! one call to the routing model profile. The decision is made once, at
//! application creation, and never re-evaluated on later turns.
//!
//! The router fails closed: a reply that is not exactly one known strategy is
//! a `Routing` error, never a silent default.

use super::{LLMProvider, LLMResponse, Message};
use sdk::errors::EngineError;
use sdk::types::Strategy;
use std::sync::Arc;
use tracing::{debug, warn};

const ROUTING_PROMPT: &str = r#"You choose how a web application will be generated.
Reply with a JSON object {"strategy": "<value>"} and nothing else, where <value> is one of:
- "html": a small, self-contained page that fits in one HTML document
- "multi_file": a page whose markup, styles and scripts belong in separate html/css/js files
- "vue_project": a multi-page or stateful application that needs a full Vue project with a build step"#;

/// Routes prompts to strategies
pub struct StrategyRouter {
    provider: Arc<dyn LLMProvider>,
}

impl StrategyRouter {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Classify `prompt` into a strategy.
    ///
    /// # Errors
    /// `EngineError::Routing` if the model call fails or its reply is not one
    /// of the supported strategies.
    pub async fn route(&self, prompt: &str) -> Result<Strategy, EngineError> {
        let messages = [Message::system(ROUTING_PROMPT), Message::user(prompt)];

        let reply = match self.provider.generate(&messages).await {
            Ok(LLMResponse::FinalAnswer(answer)) => answer.content,
            Ok(LLMResponse::ToolCall(call)) => {
                return Err(EngineError::Routing(format!(
                    "classifier requested tool '{}' instead of answering",
                    call.name
                )))
            }
            Err(e) => {
                return Err(EngineError::Routing(format!(
                    "classification call failed: {}",
                    e
                )))
            }
        };

        match parse_strategy(&reply) {
            Some(strategy) => {
                debug!(strategy = %strategy, model = self.provider.model(), "Prompt routed");
                Ok(strategy)
            }
            None => {
                warn!(reply = %truncate(&reply, 120), "Unclassifiable routing reply");
                Err(EngineError::Routing(format!(
                    "unsupported classification '{}'",
                    truncate(&reply, 60)
                )))
            }
        }
    }
}

/// Accepts `{"strategy": "html"}` (optionally fenced) or a bare value.
fn parse_strategy(reply: &str) -> Option<Strategy> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(s) = value.get("strategy").and_then(|s| s.as_str()) {
            return s.trim().to_ascii_lowercase().parse().ok();
        }
        if let Some(s) = value.as_str() {
            return s.trim().to_ascii_lowercase().parse().ok();
        }
        return None;
    }

    body.trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .to_ascii_lowercase()
        .parse()
        .ok()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
