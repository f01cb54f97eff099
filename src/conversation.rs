use serde::Serialize;

use crate::models::ConversationTurn;

/// Append-only, ordered record of one session's turns.
///
/// There is no way to edit, remove or reorder a turn once appended.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn all(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Prior turns as "User: ...\nAI: ..." blocks joined by newlines
    pub fn render_history(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("User: {}\nAI: {}", turn.question, turn.response))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let mut store = ConversationStore::new();
        assert!(store.is_empty());

        store.append(ConversationTurn::direct("first?", "one"));
        store.append(ConversationTurn::direct("second?", "two"));

        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[0].question, "first?");
        assert_eq!(store.last().unwrap().response, "two");
    }

    #[test]
    fn test_render_history() {
        let mut store = ConversationStore::new();
        assert_eq!(store.render_history(), "");

        store.append(ConversationTurn::direct("Is it gold?", "Steel."));
        store.append(ConversationTurn::direct("Water resistant?", "To 300m."));

        assert_eq!(
            store.render_history(),
            "User: Is it gold?\nAI: Steel.\nUser: Water resistant?\nAI: To 300m."
        );
    }

    #[test]
    fn test_serializes_as_list() {
        let mut store = ConversationStore::new();
        store.append(ConversationTurn::direct("q", "a"));
        let value = serde_json::to_value(&store).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["sql_query"], serde_json::Value::Null);
    }
}
