use std::sync::Arc;

use crate::conversation::ConversationStore;
use crate::llm::LanguageModel;
use crate::models::WatchContext;

/// Returned when the language model cannot produce the final answer
pub const APOLOGY: &str =
    "Sorry, I couldn't come up with an answer right now. Please try asking again in a moment.";

/// Answers straight from the language model using history and watch context.
/// Also the engine behind the SQL fallback.
pub struct DirectAnswerGenerator {
    llm: Arc<dyn LanguageModel>,
}

impl DirectAnswerGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(
        question: &str,
        context: &WatchContext,
        history: &ConversationStore,
    ) -> String {
        format!(
            "'{question}'\n\
             Here is the previous conversation context:\n\
             {history}\n\
             {details}\n\
             Please provide a comprehensive answer.\n\
             Just answer the question in a short manner, no need to talk too much.\n\
             Be helpful, don't give answers that do not help the user like \"do research\", \"I don't know\" and so on.",
            history = history.render_history(),
            details = context.details_line(),
        )
    }

    /// Never fails: a model error or blank reply yields [`APOLOGY`].
    pub async fn answer(
        &self,
        question: &str,
        context: &WatchContext,
        history: &ConversationStore,
    ) -> String {
        let prompt = Self::build_prompt(question, context, history);
        tracing::debug!(%prompt, "direct answer prompt");

        match self.llm.generate(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("Language model returned an empty direct answer");
                APOLOGY.to_string()
            }
            Err(e) => {
                tracing::warn!("Direct answer generation failed: {}", e);
                APOLOGY.to_string()
            }
        }
    }
}
