pub mod answer;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod embeddings;
pub mod error;
pub mod intent;
pub mod llm;
pub mod models;
pub mod prediction;
pub mod redis;
pub mod server;
pub mod service;
pub mod session;
pub mod synth;
pub mod transport;

pub use crate::config::Config;
pub use crate::conversation::ConversationStore;
pub use crate::dispatcher::QueryDispatcher;
pub use crate::error::{ConciergeError, Result};
pub use crate::models::{ConversationTurn, RouteDecision, RouteName, WatchContext};
pub use crate::service::ConciergeService;
