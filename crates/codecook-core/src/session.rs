use crate::error::{AiError, Result};
use crate::service::AiService;
use crate::state::{AiResponse, ChatMessage};

/// Conversation history for one chat panel.
///
/// The user's message is recorded before the call goes out and removed again
/// if the call fails, so a failed turn leaves no trace in the history.
#[derive(Debug, Default, Clone)]
pub struct ChatSession {
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// The system instruction followed by the dialogue so far.
    pub fn conversation(&self, system_prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// Runs one streamed turn on the service's active backend.
    pub async fn send_streaming<F>(
        &mut self,
        service: &AiService,
        system_prompt: &str,
        user_text: &str,
        on_fragment: F,
    ) -> Result<AiResponse>
    where
        F: FnMut(&str) + Send,
    {
        let messages = self.begin_turn(system_prompt, user_text)?;
        let result = service.stream(&messages, on_fragment, None).await;
        self.end_turn(result)
    }

    /// Runs one turn without incremental delivery.
    pub async fn send(
        &mut self,
        service: &AiService,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<AiResponse> {
        let messages = self.begin_turn(system_prompt, user_text)?;
        let result = service.send(&messages, None).await;
        self.end_turn(result)
    }

    fn begin_turn(&mut self, system_prompt: &str, user_text: &str) -> Result<Vec<ChatMessage>> {
        if user_text.trim().is_empty() {
            return Err(AiError::InvalidConversation("empty message".to_string()));
        }
        self.history.push(ChatMessage::user(user_text));
        Ok(self.conversation(system_prompt))
    }

    fn end_turn(&mut self, result: Result<AiResponse>) -> Result<AiResponse> {
        match result {
            Ok(response) => {
                self.history.push(ChatMessage::assistant(response.content.clone()));
                Ok(response)
            }
            Err(e) => {
                tracing::debug!("turn failed, dropping user message: {e}");
                self.history.pop();
                Err(e)
            }
        }
    }
}
