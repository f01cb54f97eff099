use std::sync::Arc;

use crate::answer::DirectAnswerGenerator;
use crate::conversation::ConversationStore;
use crate::intent::IntentRouter;
use crate::models::{ConversationTurn, RouteDecision, RouteName, WatchContext};
use crate::synth::SqlSynthesizer;

/// Runs one conversational turn: classify, answer, record.
pub struct QueryDispatcher {
    router: Arc<IntentRouter>,
    sql: Arc<SqlSynthesizer>,
    direct: Arc<DirectAnswerGenerator>,
    schema: Arc<str>,
}

impl QueryDispatcher {
    pub fn new(
        router: Arc<IntentRouter>,
        sql: Arc<SqlSynthesizer>,
        direct: Arc<DirectAnswerGenerator>,
        schema: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            router,
            sql,
            direct,
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Classification never fails a turn; an encoder error means `general_query`.
    pub async fn decide(&self, question: &str) -> RouteDecision {
        match self.router.classify(question).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("Intent classification failed, defaulting to general_query: {}", e);
                RouteDecision {
                    route: RouteName::GeneralQuery,
                    score: 0.0,
                }
            }
        }
    }

    /// Answer `question`, append exactly one turn to `history` and return it.
    pub async fn handle_turn(
        &self,
        question: &str,
        context: &WatchContext,
        history: &mut ConversationStore,
    ) -> ConversationTurn {
        let decision = self.decide(question).await;

        let turn = if decision.route == RouteName::SqlQuery {
            self.sql
                .synthesize(question, context, &self.schema, history)
                .await
                .into_turn()
        } else {
            let response = self.direct.answer(question, context, history).await;
            ConversationTurn::direct(question, response)
        };

        history.append(turn.clone());
        tracing::info!(
            route = %decision.route,
            turns = history.len(),
            used_sql = turn.sql_query.is_some(),
            "Turn recorded"
        );
        turn
    }
}
