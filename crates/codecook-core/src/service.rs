//! Provider selection and dispatch
//!
//! [`AiService`] is the single entry point a chat front end talks to. It knows
//! which backend is active, resolves the per-call settings for it, and routes
//! the call to the matching adapter. `stream` behaves the same whether or not
//! the adapter can deliver text incrementally: callers always get at least one
//! fragment covering the whole reply and the same final [`AiResponse`].

use crate::ai::{ChatBackend, ClaudeClient, OllamaClient, OpenAIClient};
use crate::config::Config;
use crate::error::{AiError, Result};
use crate::provider::Provider;
use crate::state::{AiResponse, ChatMessage, ChatRole, ModelInfo, ProviderConfig};

pub struct AiService {
    config: Config,
    current_provider: Provider,
    claude: Box<dyn ChatBackend>,
    openai: Box<dyn ChatBackend>,
    ollama: Box<dyn ChatBackend>,
}

impl AiService {
    /// Builds the service with the stock adapters, starting on the
    /// configured default backend.
    pub fn new(config: Config) -> Self {
        let current_provider = config.default_provider();
        Self {
            config,
            current_provider,
            claude: Box::new(ClaudeClient::new()),
            openai: Box::new(OpenAIClient::new()),
            ollama: Box::new(OllamaClient::new()),
        }
    }

    /// Replaces the adapter serving `backend.provider()`.
    pub fn with_backend(mut self, backend: Box<dyn ChatBackend>) -> Self {
        match backend.provider() {
            Provider::Claude => self.claude = backend,
            Provider::OpenAI => self.openai = backend,
            Provider::Ollama => self.ollama = backend,
        }
        self
    }

    pub fn current_provider(&self) -> Provider {
        self.current_provider
    }

    /// Takes effect for every later call. A call already running holds a
    /// shared borrow of the service, so it can't observe the change.
    pub fn set_provider(&mut self, provider: Provider) {
        tracing::info!(from = %self.current_provider, to = %provider, "switching provider");
        self.current_provider = provider;
    }

    pub fn settings(&self) -> &Config {
        &self.config
    }

    pub fn settings_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Current settings mapped into what `provider` needs for one call.
    pub fn resolve_config(&self, provider: Provider) -> ProviderConfig {
        self.config.provider_config(provider)
    }

    /// Fails when a hosted backend has no credential. Never fails for Ollama.
    pub fn validate(config: &ProviderConfig, provider: Provider) -> Result<()> {
        if provider.requires_api_key() && config.api_key.trim().is_empty() {
            return Err(AiError::MissingCredential(provider));
        }
        Ok(())
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.current_provider,
            model: self.config.model(self.current_provider),
        }
    }

    pub async fn list_models(&self, provider: Provider) -> Result<Vec<String>> {
        self.backend(provider).list_models().await
    }

    /// One request, one complete response.
    pub async fn send(
        &self,
        messages: &[ChatMessage],
        provider: Option<Provider>,
    ) -> Result<AiResponse> {
        let (provider, config) = self.prepare(messages, provider)?;
        tracing::debug!(%provider, model = %config.model, messages = messages.len(), "send");

        self.backend(provider).send_message(messages, &config).await
    }

    /// Streams the reply through `on_fragment`, then returns the aggregate.
    ///
    /// Adapters without incremental delivery get one non-streaming call and
    /// `on_fragment` is invoked once with the full content.
    pub async fn stream<F>(
        &self,
        messages: &[ChatMessage],
        mut on_fragment: F,
        provider: Option<Provider>,
    ) -> Result<AiResponse>
    where
        F: FnMut(&str) + Send,
    {
        let (provider, config) = self.prepare(messages, provider)?;
        let backend = self.backend(provider);

        if backend.supports_streaming() {
            tracing::debug!(%provider, model = %config.model, messages = messages.len(), "stream");
            return backend
                .stream_message(messages, &config, &mut on_fragment)
                .await;
        }

        tracing::debug!(%provider, model = %config.model, "stream unsupported, sending whole reply");
        let response = backend.send_message(messages, &config).await?;
        on_fragment(&response.content);
        Ok(response)
    }

    fn prepare(
        &self,
        messages: &[ChatMessage],
        provider: Option<Provider>,
    ) -> Result<(Provider, ProviderConfig)> {
        let provider = provider.unwrap_or(self.current_provider);
        let config = self.resolve_config(provider);
        Self::validate(&config, provider)?;
        check_conversation(messages)?;
        Ok((provider, config))
    }

    fn backend(&self, provider: Provider) -> &dyn ChatBackend {
        match provider {
            Provider::Claude => self.claude.as_ref(),
            Provider::OpenAI => self.openai.as_ref(),
            Provider::Ollama => self.ollama.as_ref(),
        }
    }
}

/// At least one dialogue message, at most one system message.
fn check_conversation(messages: &[ChatMessage]) -> Result<()> {
    let system_count = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .count();
    if system_count > 1 {
        return Err(AiError::InvalidConversation(format!(
            "expected at most one system message, found {}",
            system_count
        )));
    }
    if system_count == messages.len() {
        return Err(AiError::InvalidConversation(
            "conversation has no user or assistant message".to_string(),
        ));
    }
    Ok(())
}
