use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::stream::SseDecoder;
use super::{drain_body, ensure_success, read_json, transport_error, ChatBackend, FragmentSink};
use crate::error::{AiError, Result};
use crate::provider::Provider;
use crate::state::{split_system, AiResponse, ChatMessage, ProviderConfig, Usage};

/// The Anthropic Messages API endpoint.
pub const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ClaudeMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Default)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: ClaudeUsage,
}

/// Events of the streaming Messages API that carry something we use.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    /// Resolved model and prompt token count.
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStart },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: BlockDelta },
    /// Completion token count, sent near the end.
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: Option<DeltaUsage>,
    },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    /// ping, content_block_start/stop, message_stop and anything newer
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageStart {
    model: String,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct DeltaUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Accumulates a streamed Claude reply.
struct ClaudeStream {
    content: String,
    model: String,
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ClaudeStream {
    fn new(requested_model: &str) -> Self {
        Self {
            content: String::new(),
            model: requested_model.to_string(),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    /// Applies one SSE `data:` payload. Unparseable payloads are skipped.
    fn handle_data(&mut self, data: &str, on_fragment: &mut dyn FnMut(&str)) -> Result<()> {
        let event = match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("failed to parse claude event: {e}, data: {data}");
                return Ok(());
            }
        };

        match event {
            StreamEvent::MessageStart { message } => {
                self.model = message.model;
                self.prompt_tokens = message.usage.input_tokens;
            }
            StreamEvent::ContentBlockDelta {
                delta: BlockDelta::TextDelta { text },
            } => {
                self.content.push_str(&text);
                on_fragment(&text);
            }
            StreamEvent::MessageDelta { usage: Some(usage) } => {
                self.completion_tokens = usage.output_tokens;
            }
            StreamEvent::Error { error } => {
                return Err(AiError::provider(Provider::Claude, error.message));
            }
            StreamEvent::ContentBlockDelta { .. }
            | StreamEvent::MessageDelta { usage: None }
            | StreamEvent::Other => {}
        }
        Ok(())
    }

    fn finish(self) -> AiResponse {
        AiResponse {
            content: self.content,
            model: self.model,
            usage: Some(Usage::new(self.prompt_tokens, self.completion_tokens)),
        }
    }
}

#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    endpoint: String,
}

impl ClaudeClient {
    pub fn new() -> Self {
        Self::with_endpoint(ENDPOINT)
    }

    /// Targets an Anthropic-compatible endpoint other than the public API.
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
    ) -> ClaudeRequest<'a> {
        let (system, dialogue) = split_system(messages);
        ClaudeRequest {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system,
            messages: dialogue
                .into_iter()
                .map(|m| ClaudeMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
        }
    }

    async fn post(&self, request: &ClaudeRequest<'_>, api_key: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(transport_error(Provider::Claude))?;

        ensure_success(Provider::Claude, response).await
    }

    pub fn known_models() -> Vec<String> {
        vec![
            "claude-sonnet-4-20250514".to_string(),
            "claude-opus-4-20250514".to_string(),
            "claude-3-7-sonnet-20250219".to_string(),
            "claude-3-5-haiku-20241022".to_string(),
        ]
    }
}

impl Default for ClaudeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for ClaudeClient {
    fn provider(&self) -> Provider {
        Provider::Claude
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
        let claude_response: ClaudeResponse = read_json(Provider::Claude, response).await?;

        let content = claude_response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .unwrap_or_default();

        Ok(AiResponse {
            content,
            model: claude_response.model,
            usage: Some(Usage::new(
                claude_response.usage.input_tokens,
                claude_response.usage.output_tokens,
            )),
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
        let mut state = ClaudeStream::new(&config.model);

        drain_body(Provider::Claude, response, |bytes| {
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
    use pretty_assertions::assert_eq;

    fn run(payloads: &[&str]) -> (Vec<String>, Result<AiResponse>) {
        let mut fragments = Vec::new();
        let mut state = ClaudeStream::new("requested");
        let mut sink = |f: &str| fragments.push(f.to_string());
        for data in payloads {
            if let Err(e) = state.handle_data(data, &mut sink) {
                return (fragments, Err(e));
            }
        }
        (fragments, Ok(state.finish()))
    }

    #[test]
    fn test_stream_scenario_accumulates_text_and_usage() {
        let (fragments, response) = run(&[
            r#"{"type":"message_start","message":{"id":"msg_1","model":"m1","usage":{"input_tokens":10,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"4"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"."}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            r#"{"type":"message_stop"}"#,
        ]);

        assert_eq!(fragments, vec!["4".to_string(), ".".to_string()]);
        assert_eq!(
            response.unwrap(),
            AiResponse {
                content: "4.".to_string(),
                model: "m1".to_string(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 2,
                    total_tokens: 12,
                }),
            }
        );
    }

    #[test]
    fn test_stream_ignores_non_text_deltas_and_garbage() {
        let (fragments, response) = run(&[
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"a\""}}"#,
            "not json",
            r#"{"type":"some_future_event","x":1}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"ok"}}"#,
        ]);
        assert_eq!(fragments, vec!["ok".to_string()]);
        let response = response.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(response.model, "requested");
        assert_eq!(response.usage, Some(Usage::default()));
    }

    #[test]
    fn test_stream_error_event_fails() {
        let (_, response) = run(&[
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ]);
        let err = response.unwrap_err();
        assert_eq!(err.to_string(), "Claude API error: Overloaded");
    }

    #[test]
    fn test_request_extracts_system_message() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("2+2?"),
        ];
        let config = ProviderConfig {
            api_key: "key".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4000,
            temperature: 0.5,
        };
        let request = ClaudeClient::build_request(&messages, &config, false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "claude-sonnet-4-20250514",
                "max_tokens": 4000,
                "temperature": 0.5,
                "system": "be terse",
                "messages": [{"role": "user", "content": "2+2?"}],
            })
        );

        let streaming = serde_json::to_value(ClaudeClient::build_request(&messages, &config, true)).unwrap();
        assert_eq!(streaming["stream"], serde_json::json!(true));
    }

    #[test]
    fn test_non_text_first_block_yields_empty_content() {
        let raw: ClaudeResponse = serde_json::from_str(
            r#"{"model":"m","content":[{"type":"tool_use","id":"t","name":"n","input":{}}],"usage":{"input_tokens":1,"output_tokens":1}}"#,
        )
        .unwrap();
        assert!(matches!(raw.content.first(), Some(ContentBlock::Other)));
    }
}
