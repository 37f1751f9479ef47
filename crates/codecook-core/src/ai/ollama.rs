//! Ollama backend
//!
//! Talks to a local Ollama server through its `/api/chat` endpoint. No
//! credential is involved. With `stream: true` the server answers with
//! newline-delimited JSON objects, one per token batch, the last one carrying
//! `"done": true`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::stream::LineBuffer;
use super::{drain_body, ensure_success, read_json, transport_error, ChatBackend, FragmentSink};
use crate::error::{AiError, Result};
use crate::provider::Provider;
use crate::state::{AiResponse, ChatMessage, ProviderConfig, Usage};

/// Loopback address of a default Ollama install.
pub const BASE_URL: &str = "http://127.0.0.1:11434";

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A complete response, or one line of a streamed one.
#[derive(Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaChunk {
    fn content(self) -> Option<String> {
        self.message.and_then(|m| m.content)
    }
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// Incremental decoder for the newline-delimited stream.
struct OllamaStream {
    lines: LineBuffer,
    content: String,
    model: String,
    done: bool,
}

impl OllamaStream {
    fn new(requested_model: &str) -> Self {
        Self {
            lines: LineBuffer::new(),
            content: String::new(),
            model: requested_model.to_string(),
            done: false,
        }
    }

    /// Feeds one network read. Once the final object has been seen the
    /// remaining bytes are discarded.
    fn feed(&mut self, bytes: &[u8], on_fragment: &mut dyn FnMut(&str)) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.lines.push(bytes);
        while let Some(line) = self.lines.next_line() {
            self.handle_line(&line, on_fragment)?;
            if self.done {
                self.lines.clear();
                break;
            }
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str, on_fragment: &mut dyn FnMut(&str)) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let chunk = match serde_json::from_str::<OllamaChunk>(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("skipping malformed ollama line: {e}");
                return Ok(());
            }
        };

        if let Some(error) = chunk.error.as_deref() {
            return Err(AiError::provider(Provider::Ollama, error));
        }
        if let Some(model) = chunk.model.as_deref().filter(|m| !m.is_empty()) {
            self.model = model.to_string();
        }
        let done = chunk.done;
        if let Some(delta) = chunk.content().filter(|d| !d.is_empty()) {
            self.content.push_str(&delta);
            on_fragment(&delta);
        }
        self.done = done;
        Ok(())
    }

    /// Called at end-of-stream; a last line without a trailing newline still counts.
    fn finish(mut self, on_fragment: &mut dyn FnMut(&str)) -> Result<AiResponse> {
        if !self.done {
            if let Some(line) = self.lines.take_remainder() {
                self.handle_line(&line, on_fragment)?;
            }
        }
        Ok(AiResponse {
            content: self.content,
            model: self.model,
            usage: Some(Usage::default()),
        })
    }
}

#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }

    fn build_request<'a>(
        messages: &'a [ChatMessage],
        config: &'a ProviderConfig,
        stream: bool,
    ) -> OllamaRequest<'a> {
        OllamaRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        }
    }

    async fn post(&self, request: &OllamaRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.chat_url())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                AiError::provider(
                    Provider::Ollama,
                    format!("{}. Make sure Ollama is running with: ollama serve", e),
                )
            })?;

        ensure_success(Provider::Ollama, response).await
    }

    pub async fn has_model(&self, name: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m == name))
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    fn provider(&self) -> Provider {
        Provider::Ollama
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
        let response = self.post(&request).await?;
        let chunk: OllamaChunk = read_json(Provider::Ollama, response).await?;

        if let Some(error) = chunk.error.as_deref() {
            return Err(AiError::provider(Provider::Ollama, error));
        }
        let model = chunk
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| config.model.clone());

        Ok(AiResponse {
            content: chunk.content().unwrap_or_default(),
            model,
            usage: Some(Usage::default()),
        })
    }

    async fn stream_message(
        &self,
        messages: &[ChatMessage],
        config: &ProviderConfig,
        on_fragment: FragmentSink<'_>,
    ) -> Result<AiResponse> {
        let request = Self::build_request(messages, config, true);
        let response = self.post(&request).await?;

        let mut state = OllamaStream::new(&config.model);
        // Keep reading after `done` so the connection is drained, not reset.
        drain_body(Provider::Ollama, response, |bytes| {
            state.feed(bytes, &mut *on_fragment)
        })
        .await?;

        state.finish(on_fragment)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.tags_url())
            .send()
            .await
            .map_err(transport_error(Provider::Ollama))?;
        let response = ensure_success(Provider::Ollama, response).await?;

        let models_response: OllamaModelsResponse = read_json(Provider::Ollama, response).await?;
        let model_names: Vec<String> = models_response
            .models
            .into_iter()
            .map(|model| model.name)
            .collect();

        Ok(model_names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Feeds `reads` one at a time, as separate network chunks.
    fn decode(reads: &[&[u8]]) -> (Vec<String>, AiResponse) {
        let mut fragments = Vec::new();
        let mut sink = |f: &str| fragments.push(f.to_string());
        let mut state = OllamaStream::new("llama3.1");
        for read in reads {
            state.feed(read, &mut sink).unwrap();
        }
        let response = state.finish(&mut sink).unwrap();
        (fragments, response)
    }

    #[test]
    fn test_line_split_across_reads() {
        let (fragments, response) = decode(&[
            br#"{"model":"llama3.1:8b","message":{"role":"assistant","con"#,
            br#"tent":"Hel"},"done":false}"#,
            b"\n",
            br#"{"model":"llama3.1:8b","message":{"role":"assistant","content":"lo"},"done":false}
{"model":"llama3.1:8b","message":{"role":"assistant","content":""},"done":true}
"#,
        ]);
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
        assert_eq!(response.content, "Hello");
        assert_eq!(response.model, "llama3.1:8b");
        assert_eq!(response.usage, Some(Usage::default()));
    }

    #[test]
    fn test_every_split_point_decodes_identically() {
        let body = "{\"message\":{\"content\":\"na\u{ef}ve\"}}\n{\"message\":{\"content\":\" caf\u{e9}\"},\"done\":true}\n";
        let bytes = body.as_bytes();
        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            let (fragments, response) = decode(&[head, tail]);
            assert_eq!(fragments, vec!["na\u{ef}ve".to_string(), " caf\u{e9}".to_string()]);
            assert_eq!(response.content, "na\u{ef}ve caf\u{e9}");
        }
    }

    #[test]
    fn test_malformed_line_between_valid_lines_is_skipped() {
        let (fragments, response) = decode(&[
            b"{\"message\":{\"content\":\"first\"}}\n{\"message\":{\"content\":\n\n{\"message\":{\"content\":\" second\"}}\n",
        ]);
        assert_eq!(fragments, vec!["first".to_string(), " second".to_string()]);
        assert_eq!(response.content, "first second");
    }

    #[test]
    fn test_lines_after_done_are_ignored() {
        let (fragments, response) = decode(&[
            b"{\"message\":{\"content\":\"a\"},\"done\":true}\n{\"message\":{\"content\":\"b\"}}\n",
            b"{\"message\":{\"content\":\"c\"}}\n",
        ]);
        assert_eq!(fragments, vec!["a".to_string()]);
        assert_eq!(response.content, "a");
    }

    #[test]
    fn test_unterminated_last_line_is_processed() {
        let (fragments, response) = decode(&[b"{\"model\":\"m\",\"message\":{\"content\":\"tail\"},\"done\":true}"]);
        assert_eq!(fragments, vec!["tail".to_string()]);
        assert_eq!(response.model, "m");
    }

    #[test]
    fn test_requested_model_kept_when_not_echoed() {
        let (_, response) = decode(&[b"{\"message\":{\"content\":\"x\"}}\n"]);
        assert_eq!(response.model, "llama3.1");
    }

    #[test]
    fn test_error_line_fails_stream() {
        let mut state = OllamaStream::new("llama3.1");
        let err = state
            .feed(b"{\"error\":\"model 'nope' not found\"}\n", &mut |_: &str| {})
            .unwrap_err();
        assert_eq!(err.to_string(), "Ollama API error: model 'nope' not found");
    }

    #[test]
    fn test_request_uses_ollama_option_names() {
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let config = ProviderConfig {
            api_key: "local".to_string(),
            model: "llama3.1".to_string(),
            max_tokens: 4000,
            temperature: 0.5,
        };
        let json = serde_json::to_value(OllamaClient::build_request(&messages, &config, true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3.1",
                "messages": [
                    {"role": "system", "content": "be terse"},
                    {"role": "user", "content": "hi"},
                ],
                "stream": true,
                "options": {"temperature": 0.5, "num_predict": 4000},
            })
        );
    }

    #[test]
    fn test_default_urls() {
        let client = OllamaClient::new();
        assert_eq!(client.chat_url(), "http://127.0.0.1:11434/api/chat");
        assert_eq!(client.tags_url(), "http://127.0.0.1:11434/api/tags");
        let client = OllamaClient::with_base_url("http://localhost:8080/");
        assert_eq!(client.chat_url(), "http://localhost:8080/api/chat");
    }
}
