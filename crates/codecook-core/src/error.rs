use thiserror::Error;

use crate::provider::Provider;

pub type Result<T> = std::result::Result<T, AiError>;

/// Errors surfaced by the provider layer.
#[derive(Debug, Error)]
pub enum AiError {
    /// A hosted backend was selected without its API key configured.
    #[error("{} API key not configured. Set `{}` with `codecook config set` or export {}.", .0.display_name(), .0.api_key_setting().unwrap_or("api_key"), .0.api_key_env().unwrap_or("the key"))]
    MissingCredential(Provider),

    /// Transport failure, non-success status, or unexpected payload.
    #[error("{} API error: {message}", .provider.display_name())]
    Provider { provider: Provider, message: String },

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),
}

impl AiError {
    pub fn provider(provider: Provider, message: impl Into<String>) -> Self {
        AiError::Provider {
            provider,
            message: message.into(),
        }
    }

    /// The backend this error came from, if any.
    pub fn backend(&self) -> Option<Provider> {
        match self {
            AiError::MissingCredential(p) => Some(*p),
            AiError::Provider { provider, .. } => Some(*provider),
            AiError::InvalidConversation(_) => None,
        }
    }
}
