//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use appforge_engine::config::Config;
use appforge_engine::deploy::{ProjectBuilder, ScreenshotCapturer, BUILD_OUTPUT_DIR};
use appforge_engine::llm::{
    FinalAnswer, LLMError, LLMProvider, LLMResponse, Message, TokenStream, ToolCall,
};
use appforge_engine::{Engine, Providers};
use async_trait::async_trait;
use futures::StreamExt;
use sdk::errors::EngineError;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// One scripted model reply
#[derive(Debug, Clone)]
pub enum Step {
    /// Final answer, streamed line by line
    Answer(String),
    /// Tool call with JSON arguments
    Tool(String, String),
    /// Request rejected before any text
    Fail(String),
    /// Streams `prefix`, then fails
    FailAfter(String, String),
    /// Streams `prefix`, then never finishes
    Hang(String),
}

/// Provider that replays a script and records every request.
///
/// When the script runs out the last step repeats.
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    requests: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn answering(text: &str) -> Arc<Self> {
        Self::new(vec![Step::Answer(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    fn next_step(&self, messages: &[Message]) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());

        let mut last = self.last.lock().unwrap();
        match self.steps.lock().unwrap().pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last
                .clone()
                .unwrap_or_else(|| Step::Fail("script exhausted".to_string())),
        }
    }
}

fn lines(text: &str) -> Vec<appforge_engine::llm::Result<String>> {
    text.split_inclusive('\n').map(|l| Ok(l.to_string())).collect()
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn generate(&self, messages: &[Message]) -> appforge_engine::llm::Result<LLMResponse> {
        match self.next_step(messages) {
            Step::Answer(text) => Ok(LLMResponse::FinalAnswer(FinalAnswer::new(text))),
            Step::Tool(name, arguments) => Ok(LLMResponse::ToolCall(ToolCall {
                id: format!("call_{}", self.calls()),
                name,
                arguments,
            })),
            Step::Fail(reason) | Step::FailAfter(_, reason) => {
                Err(LLMError::ProviderUnavailable(reason))
            }
            Step::Hang(_) => futures::future::pending().await,
        }
    }

    async fn generate_stream(
        &self,
        messages: &[Message],
    ) -> appforge_engine::llm::Result<TokenStream> {
        match self.next_step(messages) {
            Step::Answer(text) => Ok(futures::stream::iter(lines(&text)).boxed()),
            Step::Fail(reason) => Err(LLMError::ProviderUnavailable(reason)),
            Step::FailAfter(prefix, reason) => {
                let mut items = lines(&prefix);
                items.push(Err(LLMError::ProviderUnavailable(reason)));
                Ok(futures::stream::iter(items).boxed())
            }
            Step::Hang(prefix) => Ok(futures::stream::iter(lines(&prefix))
                .chain(futures::stream::pending())
                .boxed()),
            Step::Tool(name, _) => Err(LLMError::ParseError(format!(
                "unexpected tool call '{}' in streamed generation",
                name
            ))),
        }
    }
}

/// Builder that fakes `npm run build` by writing `dist/index.html`
pub struct StubBuilder {
    pub fail: bool,
    pub builds: AtomicUsize,
}

impl StubBuilder {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            builds: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            builds: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProjectBuilder for StubBuilder {
    async fn build(&self, project_dir: &Path) -> Result<(), EngineError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::BuildFailed("vite: missing entry".to_string()));
        }
        let dist = project_dir.join(BUILD_OUTPUT_DIR);
        tokio::fs::create_dir_all(&dist).await?;
        tokio::fs::write(dist.join("index.html"), "<div id=app></div>").await?;
        Ok(())
    }
}

/// Capturer that records every attempt and returns a fixed cover reference
pub struct StubCapturer {
    pub fail: bool,
    pub captured: Mutex<Vec<String>>,
}

impl StubCapturer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            captured: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            captured: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

#[async_trait]
impl ScreenshotCapturer for StubCapturer {
    async fn capture(&self, url: &str) -> Result<String, EngineError> {
        self.captured.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(EngineError::ToolError("chrome exited with status 1".to_string()));
        }
        Ok("https://cdn.example.com/covers/cover.png".to_string())
    }
}

/// Engine wired to scripted collaborators
pub struct TestEngine {
    pub dir: TempDir,
    pub engine: Engine,
    pub chat: Arc<ScriptedProvider>,
    pub reasoning: Arc<ScriptedProvider>,
    pub routing: Arc<ScriptedProvider>,
}

pub struct TestEngineBuilder {
    chat: Arc<ScriptedProvider>,
    reasoning: Arc<ScriptedProvider>,
    routing: Arc<ScriptedProvider>,
    builder: Arc<dyn ProjectBuilder>,
    capturer: Option<Arc<dyn ScreenshotCapturer>>,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self {
            chat: ScriptedProvider::answering("```html\n<h1>hello</h1>\n```"),
            reasoning: ScriptedProvider::answering("Project ready."),
            routing: ScriptedProvider::answering(r#"{"strategy": "html"}"#),
            builder: StubBuilder::ok(),
            capturer: None,
        }
    }

    pub fn chat(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.chat = provider;
        self
    }

    pub fn reasoning(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.reasoning = provider;
        self
    }

    pub fn routing(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.routing = provider;
        self
    }

    pub fn builder(mut self, builder: Arc<dyn ProjectBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn capturer(mut self, capturer: Arc<dyn ScreenshotCapturer>) -> Self {
        self.capturer = Some(capturer);
        self
    }

    pub async fn build(self) -> TestEngine {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path()).unwrap();
        config.deploy.host = "http://localhost:8123/deploy".to_string();

        let providers = Providers {
            chat: self.chat.clone(),
            reasoning: self.reasoning.clone(),
            routing: self.routing.clone(),
        };
        let engine = Engine::assemble(config, providers, self.builder, self.capturer)
            .await
            .unwrap();

        TestEngine {
            dir,
            engine,
            chat: self.chat,
            reasoning: self.reasoning,
            routing: self.routing,
        }
    }
}

pub fn routed(strategy: &str) -> Arc<ScriptedProvider> {
    ScriptedProvider::answering(&format!(r#"{{"strategy": "{}"}}"#, strategy))
}
