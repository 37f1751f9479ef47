use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::stream::SseDecoder;
use super::{drain_body, ensure_success, read_json, transport_error, ChatBackend, FragmentSink};
use crate::error::{AiError, Result};
use crate::provider::Provider;
use crate::state::{AiResponse, ChatMessage, ProviderConfig, Usage};

/// OpenAI chat completions endpoint.
pub const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Sentinel payload closing an OpenAI event stream.
const DONE: &str = "[DONE]";

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    #[serde(default)]
    message: Option<OpenAIResponseMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Accumulates a streamed OpenAI reply.
struct OpenAIStream {
    content: String,
    model: String,
    done: bool,
}

impl OpenAIStream {
    fn new(requested_model: &str) -> Self {
        Self {
            content: String::new(),
            model: requested_model.to_string(),
            done: false,
        }
    }

    fn handle_data(&mut self, data: &str, on_fragment: &mut dyn FnMut(&str)) -> Result<()> {
        let data = data.trim();
        if self.done || data.is_empty() {
            return Ok(());
        }
        if data == DONE {
            self.done = true;
            return Ok(());
        }

        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("failed to parse openai chunk: {e}, data: {data}");
                return Ok(());
            }
        };

        if let Some(error) = chunk.error {
            return Err(AiError::provider(Provider::OpenAI, error.message));
        }
        if let Some(model) = chunk.model.filter(|m| !m.is_empty()) {
            self.model = model;
        }
        let delta = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .unwrap_or_default();
        if !delta.is_empty() {
            self.content.push_str(&delta);
            on_fragment(&delta);
        }
        Ok(())
    }

    /// Streaming replies carry no token counts, so usage stays unreported.
    fn finish(self) -> AiResponse {
        AiResponse {
            content: self.content,
            model: self.model,
            usage: None,
        }
    }
}

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    endpoint: String,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self::with_endpoint(ENDPOINT)
    }

    /// Targets any endpoint speaking the chat completions API.
    pub fn with_endpoint(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    fn build_request<'a>(
        messages: &'a [ChatMessage],
        config: &'a ProviderConfig,
        stream: bool,
    ) -> OpenAIRequest<'a> {
        OpenAIRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| OpenAIMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream,
        }
    }

    async fn post(&self, request: &OpenAIRequest<'_>, api_key: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport_error(Provider::OpenAI))?;

        ensure_success(Provider::OpenAI, response).await
    }

    pub fn known_models() -> Vec<String> {
        vec![
            "gpt-4-turbo-preview".to_string(),
            "gpt-4o".to_string(),
            "gpt-4o-mini".to_string(),
            "gpt-3.5-turbo".to_string(),
        ]
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for OpenAIClient {
    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn send_message(
        &self,
        messages: &[ChatMessage],
        config: &ProviderConfig,
    ) -> Result<AiResponse> {
        let request = Self::build_request(messages, config, false);
        let response = self.post(&request, &config.api_key).await?;
        let openai_response: OpenAIResponse = read_json(Provider::OpenAI, response).await?;

        let content = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        let usage = openai_response.usage.map_or_else(Usage::default, |u| Usage {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
            total_tokens: u.total_tokens.unwrap_or(0),
        });

        Ok(AiResponse {
            content,
            model: openai_response
                .model
                .unwrap_or_else(|| config.model.clone()),
            usage: Some(usage),
        })
    }

    async fn stream_message(
        &self,
        messages: &[ChatMessage],
        config: &ProviderConfig,
        on_fragment: FragmentSink<'_>,
    ) -> Result<AiResponse> {
        let request = Self::build_request(messages, config, true);
        let response = self.post(&request, &config.api_key).await?;

        let mut decoder = SseDecoder::new();
        let mut state = OpenAIStream::new(&config.model);

        drain_body(Provider::OpenAI, response, |bytes| {
            for event in decoder.push(bytes) {
                state.handle_data(&event.data, &mut *on_fragment)?;
            }
            Ok(())
        })
        .await?;

        if let Some(event) = decoder.finish() {
            state.handle_data(&event.data, &mut *on_fragment)?;
        }

        Ok(state.finish())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Self::known_models())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(payloads: &[&str]) -> (Vec<String>, AiResponse) {
        let mut fragments = Vec::new();
        let mut state = OpenAIStream::new("gpt-4o");
        let mut sink = |f: &str| fragments.push(f.to_string());
        for data in payloads {
            state.handle_data(data, &mut sink).unwrap();
        }
        (fragments, state.finish())
    }

    #[test]
    fn test_stream_accumulates_deltas_and_tracks_model() {
        let (fragments, response) = run(&[
            r#"{"id":"c1","model":"gpt-4o-2024-08-06","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"id":"c1","model":"gpt-4o-2024-08-06","choices":[{"index":0,"delta":{"content":"4"}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"."}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]);
        assert_eq!(fragments, vec!["4".to_string(), ".".to_string()]);
        assert_eq!(response.content, "4.");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.usage, None);
    }

    #[test]
    fn test_stream_ignores_data_after_done() {
        let (fragments, response) = run(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            "[DONE]",
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
        ]);
        assert_eq!(fragments, vec!["a".to_string()]);
        assert_eq!(response.content, "a");
        assert_eq!(response.model, "gpt-4o");
    }

    #[test]
    fn test_stream_skips_malformed_chunk() {
        let (fragments, _) = run(&[
            r#"{"choices":[{"delta":{"content":"a"}}]}"#,
            r#"{"choices":[{"delta":{"content":"#,
            r#"{"choices":[{"delta":{"content":"b"}}]}"#,
        ]);
        assert_eq!(fragments, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_stream_error_chunk_fails() {
        let mut state = OpenAIStream::new("gpt-4o");
        let err = state
            .handle_data(r#"{"error":{"message":"quota exceeded"}}"#, &mut |_: &str| {})
            .unwrap_err();
        assert_eq!(err.to_string(), "OpenAI API error: quota exceeded");
    }

    #[test]
    fn test_request_keeps_system_inline() {
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("2+2?")];
        let config = ProviderConfig {
            api_key: "sk".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 10,
            temperature: 0.0,
        };
        let json = serde_json::to_value(OpenAIClient::build_request(&messages, &config, false)).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "2+2?");
        assert_eq!(json["max_tokens"], 10);
        assert!(json.get("stream").is_none());
    }
}
