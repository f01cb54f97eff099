use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{ConciergeError, Result};
use crate::models::{ChatMessage, ChatRequest};
use crate::transport::Transport;

#[cfg(test)]
use mockall::automock;

/// Text-in, text-out language model capability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct GroqLanguageModel {
    tx: Arc<dyn Transport>,
    model: String,
    temperature: f32,
    max_tokens: i32,
}

impl GroqLanguageModel {
    pub fn new(tx: Arc<dyn Transport>, model: String, temperature: f32, max_tokens: i32) -> Self {
        Self {
            tx,
            model,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl LanguageModel for GroqLanguageModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "generating completion");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self.tx.chat(&request).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                ConciergeError::Generation("chat API returned empty choices".to_string())
            })
    }
}
