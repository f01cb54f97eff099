use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::answer::DirectAnswerGenerator;
use crate::catalog::{RelationalStore, SqliteCatalog};
use crate::config::{Config, EncoderProvider};
use crate::dispatcher::QueryDispatcher;
use crate::embeddings::{CachedEncoder, Encoder, HashingEncoder, OpenAiEncoder};
use crate::error::{ConciergeError, Result};
use crate::intent::{IntentRouter, default_routes};
use crate::llm::{GroqLanguageModel, LanguageModel};
use crate::models::{ConversationTurn, Prediction, WatchContext};
use crate::prediction::PredictionClient;
use crate::redis::RedisManager;
use crate::session::SessionRegistry;
use crate::synth::SqlSynthesizer;
use crate::transport::GroqTransport;

/// Read-only snapshot of a session for display
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub context: WatchContext,
    pub turns: Vec<ConversationTurn>,
}

/// Wire the conversational core from its capabilities
pub fn build_dispatcher(
    encoder: Arc<dyn Encoder>,
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn RelationalStore>,
    schema: String,
    baseline_score: f64,
) -> QueryDispatcher {
    let router = Arc::new(IntentRouter::new(
        encoder,
        default_routes().into(),
        baseline_score,
    ));
    let direct = Arc::new(DirectAnswerGenerator::new(Arc::clone(&llm)));
    let sql = Arc::new(SqlSynthesizer::new(llm, store, Arc::clone(&direct)));
    QueryDispatcher::new(router, sql, direct, schema)
}

/// Shared application service: the dispatcher, the prediction client and
/// every live session.
pub struct ConciergeService {
    dispatcher: QueryDispatcher,
    predictor: PredictionClient,
    sessions: SessionRegistry,
}

impl ConciergeService {
    pub fn new(
        dispatcher: QueryDispatcher,
        predictor: PredictionClient,
        sessions: SessionRegistry,
    ) -> Self {
        Self {
            dispatcher,
            predictor,
            sessions,
        }
    }

    pub async fn from_config(cfg: &Config) -> Result<Self> {
        tracing::info!("Service::from_config() - Starting initialization");

        let transport = Arc::new(GroqTransport::new(
            cfg.groq.api_key.clone(),
            cfg.retry.clone(),
        )?);
        let llm: Arc<dyn LanguageModel> = Arc::new(GroqLanguageModel::new(
            transport,
            cfg.groq.model.clone(),
            cfg.groq.temperature,
            cfg.groq.max_tokens,
        ));

        let encoder = build_encoder(cfg).await?;

        let catalog = SqliteCatalog::open_read_only(Path::new(&cfg.catalog.path))?;
        let schema = catalog.schema_description().unwrap_or_else(|e| {
            tracing::error!("Error fetching schema details: {} - continuing without schema", e);
            String::new()
        });
        tracing::info!(schema_len = schema.len(), "Catalog schema loaded");

        let dispatcher = build_dispatcher(
            encoder,
            llm,
            Arc::new(catalog),
            schema,
            cfg.router.baseline_score,
        );
        let predictor = PredictionClient::new(cfg.prediction.base_url.clone())?;
        let sessions = SessionRegistry::from_config(&cfg.sessions);

        tracing::info!("Service::from_config() - Service initialization complete");
        Ok(Self::new(dispatcher, predictor, sessions))
    }

    pub fn dispatcher(&self) -> &QueryDispatcher {
        &self.dispatcher
    }

    pub fn predictor(&self) -> &PredictionClient {
        &self.predictor
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Predict the uploaded watch and open a session for it
    pub async fn start_session(&self, image: Vec<u8>, file_name: &str) -> Result<(Uuid, Prediction)> {
        if image.is_empty() {
            return Err(ConciergeError::validation("image", "No image file provided"));
        }
        let prediction = self.predictor.predict(image.clone(), file_name).await?;
        let id = self
            .sessions
            .create(prediction.clone().into_context(image))
            .await;
        Ok((id, prediction))
    }

    pub async fn open_session(&self, context: WatchContext) -> Uuid {
        self.sessions.create(context).await
    }

    /// Run one turn in a session. Turns in the same session never overlap.
    pub async fn ask(&self, session_id: Uuid, question: &str) -> Result<ConversationTurn> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ConciergeError::validation("question", "question cannot be empty"));
        }

        let session = self.sessions.get(session_id).await?;
        let mut guard = session.lock().await;
        let (context, conversation) = guard.turn_state();
        Ok(self
            .dispatcher
            .handle_turn(question, context, conversation)
            .await)
    }

    pub async fn conversation(&self, session_id: Uuid) -> Result<ConversationView> {
        let session = self.sessions.get(session_id).await?;
        let guard = session.lock().await;
        Ok(ConversationView {
            session_id: guard.id(),
            created_at: guard.created_at(),
            context: guard.context().clone(),
            turns: guard.conversation().all().to_vec(),
        })
    }
}

async fn build_encoder(cfg: &Config) -> Result<Arc<dyn Encoder>> {
    let base: Arc<dyn Encoder> = match cfg.encoder.provider {
        EncoderProvider::Openai => Arc::new(OpenAiEncoder::new(
            &cfg.openai.api_key()?,
            cfg.openai.embedding_model.clone(),
        )),
        EncoderProvider::Hashing => Arc::new(HashingEncoder::new(cfg.encoder.dimensions)),
    };

    if !cfg.redis.enabled {
        return Ok(base);
    }

    match RedisManager::new_with_config(cfg).await {
        Ok(manager) => Ok(Arc::new(CachedEncoder::new(base, Arc::new(manager)))),
        Err(e) => {
            tracing::warn!("Redis unavailable, embeddings will not be cached: {}", e);
            Ok(base)
        }
    }
}
