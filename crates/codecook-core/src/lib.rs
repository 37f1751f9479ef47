pub mod ai;
pub mod config;
pub mod context;
pub mod error;
pub mod provider;
pub mod service;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use ai::{ChatBackend, ClaudeClient, OllamaClient, OpenAIClient};
pub use config::Config;
pub use context::FileContext;
pub use error::AiError;
pub use provider::Provider;
pub use service::AiService;
pub use session::ChatSession;
pub use state::{AiResponse, ChatMessage, ChatRole, ModelInfo, ProviderConfig, Usage};
