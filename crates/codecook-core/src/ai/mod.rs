//! Provider adapters
//!
//! One adapter per backend, all behind [`ChatBackend`]. Each adapter turns the
//! shared conversation into its backend's wire request and turns the wire
//! response (or stream) back into an [`AiResponse`].
//!
//! The set of adapters is fixed: [`ClaudeClient`], [`OpenAIClient`] and
//! [`OllamaClient`]. The dispatcher holds exactly one per [`Provider`].

pub mod claude;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use claude::ClaudeClient;
pub use ollama::OllamaClient;
pub use openai::OpenAIClient;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::error::{AiError, Result};
use crate::provider::Provider;
use crate::state::{AiResponse, ChatMessage, ProviderConfig};

/// Callback receiving each text fragment as it arrives.
pub type FragmentSink<'a> = &'a mut (dyn FnMut(&str) + Send);

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Which backend this adapter talks to
    fn provider(&self) -> Provider;

    /// Whether [`ChatBackend::stream_message`] delivers text incrementally.
    ///
    /// The dispatcher reads this once per call; adapters that return `false`
    /// are only ever asked for [`ChatBackend::send_message`].
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Send the conversation and wait for the complete response
    async fn send_message(
        &self,
        messages: &[ChatMessage],
        config: &ProviderConfig,
    ) -> Result<AiResponse>;

    /// Send the conversation and forward each fragment to `on_fragment` in
    /// arrival order, returning the aggregate once the backend is done.
    async fn stream_message(
        &self,
        _messages: &[ChatMessage],
        _config: &ProviderConfig,
        _on_fragment: FragmentSink<'_>,
    ) -> Result<AiResponse> {
        Err(AiError::provider(
            self.provider(),
            "incremental delivery is not supported",
        ))
    }

    /// Models this backend can serve
    async fn list_models(&self) -> Result<Vec<String>>;
}

/// Maps a transport failure onto the adapter's error.
pub(crate) fn transport_error(provider: Provider) -> impl Fn(reqwest::Error) -> AiError {
    move |e| AiError::provider(provider, e.to_string())
}

/// Turns a non-success status into an error carrying the response body.
pub(crate) async fn ensure_success(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(AiError::provider(provider, format!("{}: {}", status, text.trim())))
}

/// Reads the whole body and parses it as `T`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T> {
    let text = response.text().await.map_err(transport_error(provider))?;
    tracing::trace!(%provider, "response: {text}");
    serde_json::from_str(&text)
        .map_err(|e| AiError::provider(provider, format!("unexpected response: {}", e)))
}

/// Drives a response body to end-of-stream, handing each chunk to `on_chunk`.
///
/// `on_chunk` may fail (for example on an error event), which stops the read.
pub(crate) async fn drain_body<F>(
    provider: Provider,
    response: reqwest::Response,
    mut on_chunk: F,
) -> Result<()>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(transport_error(provider))?;
        on_chunk(&bytes)?;
    }
    Ok(())
}
