use std::fmt;

/// The backends codecook can relay a conversation to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Claude,
    OpenAI,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
            Provider::Ollama => "ollama",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Some(Provider::Claude),
            "openai" | "chatgpt" => Some(Provider::OpenAI),
            "ollama" | "local" => Some(Provider::Ollama),
            _ => None,
        }
    }

    pub fn all() -> Vec<Provider> {
        vec![Provider::Claude, Provider::OpenAI, Provider::Ollama]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::OpenAI => "OpenAI",
            Provider::Ollama => "Ollama",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Provider::Claude => "Anthropic Claude",
            Provider::OpenAI => "OpenAI GPT",
            Provider::Ollama => "Local LLM running via Ollama",
        }
    }

    /// Hosted backends need an API key; the local server does not.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Provider::Ollama)
    }

    /// Model used when the settings don't name one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => "claude-sonnet-4-20250514",
            Provider::OpenAI => "gpt-4-turbo-preview",
            Provider::Ollama => "llama3.1",
        }
    }

    /// Name of the settings key holding this backend's credential.
    pub fn api_key_setting(&self) -> Option<&'static str> {
        match self {
            Provider::Claude => Some("anthropic_api_key"),
            Provider::OpenAI => Some("openai_api_key"),
            Provider::Ollama => None,
        }
    }

    /// Environment variable that overrides the stored credential.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::Claude => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::Ollama => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_round_trips_as_str() {
        for provider in Provider::all() {
            assert_eq!(Provider::from_str(provider.as_str()), Some(provider));
        }
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!(Provider::from_str("Anthropic"), Some(Provider::Claude));
        assert_eq!(Provider::from_str(" ChatGPT "), Some(Provider::OpenAI));
        assert_eq!(Provider::from_str("local"), Some(Provider::Ollama));
        assert_eq!(Provider::from_str("gemini"), None);
    }

    #[test]
    fn test_only_hosted_backends_require_keys() {
        assert!(Provider::Claude.requires_api_key());
        assert!(Provider::OpenAI.requires_api_key());
        assert!(!Provider::Ollama.requires_api_key());
        assert_eq!(Provider::Ollama.api_key_setting(), None);
    }
}
