use serde::{Deserialize, Serialize};
use std::fmt;

/// Exemplar that stands for "any input" on the general route
pub const WILDCARD_EXEMPLAR: &str = "*";

/// What the prediction service told us about the uploaded watch.
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchContext {
    pub brand: String,
    pub price: String,
    #[serde(skip)]
    pub image: Vec<u8>,
}

impl WatchContext {
    pub fn new(brand: impl Into<String>, price: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            brand: brand.into(),
            price: price.into(),
            image,
        }
    }

    /// The "Watch Details" line every prompt ends with
    pub fn details_line(&self) -> String {
        format!("Watch Details: Brand - {}, Price - {}", self.brand, self.price)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RouteName {
    SqlQuery,
    Chitchat,
    GeneralQuery,
}

impl RouteName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteName::SqlQuery => "sql_query",
            RouteName::Chitchat => "chitchat",
            RouteName::GeneralQuery => "general_query",
        }
    }
}

impl fmt::Display for RouteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named intent and the utterances that anchor it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub name: RouteName,
    pub exemplars: Vec<String>,
}

impl Route {
    pub fn new(name: RouteName, exemplars: &[&str]) -> Self {
        Self {
            name,
            exemplars: exemplars.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.exemplars.iter().any(|e| e == WILDCARD_EXEMPLAR)
    }
}

/// Outcome of classifying one utterance. Never persisted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RouteDecision {
    pub route: RouteName,
    pub score: f64,
}

/// One question/answer exchange, recorded exactly once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub question: String,
    pub sql_query: Option<String>,
    pub query_result: Option<String>,
    pub response: String,
}

impl ConversationTurn {
    /// A turn answered without touching the database
    pub fn direct(question: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sql_query: None,
            query_result: None,
            response: response.into(),
        }
    }
}

/// Successful body of `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub predicted_class: String,
    pub confidence: f64,
    pub price: String,
}

impl Prediction {
    pub fn into_context(self, image: Vec<u8>) -> WatchContext {
        WatchContext::new(self.predicted_class, self.price, image)
    }
}

/// Error body used by the prediction service and our own HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// Chat-completions message format
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

// Chat-completions request format
#[derive(Debug, Serialize, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: i32,
}

// Chat-completions response format
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}
