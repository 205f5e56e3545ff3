use super::{FinalAnswer, LLMError, LLMProvider, LLMResponse, Message, MessageRole, TokenStream};
use crate::config::ModelProfile;
use crate::secrets::SecretString;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Duration;

/// Client for any OpenAI-compatible chat completions endpoint.
///
/// One instance is bound to one model profile; the engine builds one per
/// profile (chat, reasoning, routing) over a shared HTTP client.
pub struct OpenAIProvider {
    base_url: String,
    api_key: Option<SecretString>,
    profile: ModelProfile,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        profile: ModelProfile,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            profile,
            timeout,
            client,
        }
    }

    fn payload(&self, messages: &[Message], stream: bool) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|msg| match msg.role {
                // Tool calls travel as plain text, so results cannot use the
                // native "tool" role without a matching tool_calls entry
                MessageRole::Tool => json!({
                    "role": "user",
                    "content": format!("Tool result:\n{}", msg.content)
                }),
                _ => json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                }),
            })
            .collect();

        json!({
            "model": self.profile.model,
            "messages": api_messages,
            "max_tokens": self.profile.max_tokens,
            "temperature": self.profile.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, messages: &[Message], stream: bool) -> super::Result<reqwest::Response> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            LLMError::AuthenticationFailed("no API key configured".to_string())
        })?;

        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", api_key.unsecure()))
            .header("Content-Type", "application/json")
            .json(&self.payload(messages, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                500..=599 => LLMError::ProviderUnavailable(format!("{}: {}", status, text)),
                _ => LLMError::InvalidRequest(text),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.profile.model
    }

    async fn check_health(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, messages: &[Message]) -> super::Result<LLMResponse> {
        let data: Value = self
            .send(messages, false)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

        let message = choice
            .get("message")
            .ok_or_else(|| LLMError::ParseError("No message in choice".to_string()))?;

        if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
            if let Some(tool_call) = super::parse_tool_calls(content) {
                return Ok(LLMResponse::ToolCall(tool_call));
            }
            Ok(LLMResponse::FinalAnswer(FinalAnswer::new(content)))
        } else {
            Err(LLMError::ParseError("Empty content".to_string()))
        }
    }

    async fn generate_stream(&self, messages: &[Message]) -> super::Result<TokenStream> {
        let response = self.send(messages, true).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(decode_event_stream(body))
    }
}

/// Incremental decoder for the `data: {...}` lines of a completions stream
struct SseDecoder {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    finished: bool,
}

impl SseDecoder {
    /// Consume every complete line in the buffer. Lines are split on raw bytes
    /// so multi-byte characters cut across network chunks stay intact.
    fn drain_lines(&mut self) -> super::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            self.handle_line(line.trim())?;
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) -> super::Result<()> {
        let Some(data) = line.strip_prefix("data:") else {
            // Comments, event names and blank separators carry no text
            return Ok(());
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.finished = true;
            return Ok(());
        }

        let event: Value =
            serde_json::from_str(data).map_err(|e| LLMError::ParseError(e.to_string()))?;

        if let Some(error) = event.get("error") {
            return Err(LLMError::InvalidRequest(error.to_string()));
        }

        if let Some(text) = event
            .pointer("/choices/0/delta/content")
            .and_then(|c| c.as_str())
        {
            if !text.is_empty() {
                self.pending.push_back(text.to_string());
            }
        }

        Ok(())
    }
}

fn decode_event_stream(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> TokenStream {
    let decoder = SseDecoder {
        body,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(decoder, |mut st| async move {
        loop {
            if let Some(text) = st.pending.pop_front() {
                return Some((Ok(text), st));
            }
            if st.finished {
                return None;
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    st.buffer.extend_from_slice(&bytes);
                    if let Err(e) = st.drain_lines() {
                        st.finished = true;
                        return Some((Err(e), st));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(LLMError::from(e)), st));
                }
                None => {
                    st.finished = true;
                    if !st.buffer.is_empty() {
                        st.buffer.push(b'\n');
                        if let Err(e) = st.drain_lines() {
                            return Some((Err(e), st));
                        }
                    }
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_from(parts: Vec<&'static str>) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(p.as_bytes().to_vec()))).boxed()
    }

    #[tokio::test]
    async fn test_decoder_reassembles_split_lines() {
        let body = body_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"<ht\"}}]}\n\nda",
            "ta: {\"choices\":[{\"delta\":{\"content\":\"ml>\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        let chunks: Vec<String> = decode_event_stream(body)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["<ht".to_string(), "ml>".to_string()]);
    }

    #[tokio::test]
    async fn test_decoder_skips_role_only_deltas() {
        let body = body_from(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]);

        let chunks: Vec<String> = decode_event_stream(body)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_decoder_surfaces_malformed_event() {
        let body = body_from(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: {not json\n\n",
        ]);

        let results: Vec<super::super::Result<String>> =
            decode_event_stream(body).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(LLMError::ParseError(_))));
    }

    #[tokio::test]
    async fn test_missing_key_is_authentication_failure() {
        let provider = OpenAIProvider::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            ModelProfile {
                model: "gpt-4o-mini".to_string(),
                max_tokens: 16,
                temperature: 0.0,
            },
            Duration::from_secs(1),
        );

        let result = provider.generate(&[Message::user("hello")]).await;
        assert!(matches!(result, Err(LLMError::AuthenticationFailed(_))));
    }
}
