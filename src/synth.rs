use std::fmt;
use std::sync::Arc;

use crate::answer::DirectAnswerGenerator;
use crate::catalog::{RelationalStore, Row};
use crate::conversation::ConversationStore;
use crate::error::{ConciergeError, Result};
use crate::llm::LanguageModel;
use crate::models::{ConversationTurn, WatchContext};

/// Recorded as `query_result` whenever the database path gives up
pub const NO_DATA_NOTICE: &str =
    "No data was found in our database for your query. Let me find the information for you.";

/// Which step of the database path failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Generation,
    Extraction,
    Execution,
    EmptyResult,
    Summary,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FallbackReason::Generation => "sql generation failed",
            FallbackReason::Extraction => "no sql in model output",
            FallbackReason::Execution => "sql execution failed",
            FallbackReason::EmptyResult => "query returned no rows",
            FallbackReason::Summary => "summary generation failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    /// Rows were found and summarized
    Answered(ConversationTurn),
    /// The database path failed; the turn carries the notice and a direct answer
    FellBack {
        reason: FallbackReason,
        turn: ConversationTurn,
    },
}

impl SqlOutcome {
    pub fn turn(&self) -> &ConversationTurn {
        match self {
            SqlOutcome::Answered(turn) => turn,
            SqlOutcome::FellBack { turn, .. } => turn,
        }
    }

    pub fn into_turn(self) -> ConversationTurn {
        match self {
            SqlOutcome::Answered(turn) => turn,
            SqlOutcome::FellBack { turn, .. } => turn,
        }
    }

    pub fn fell_back(&self) -> bool {
        matches!(self, SqlOutcome::FellBack { .. })
    }
}

/// Remove markdown code fences the model may wrap its SQL in
pub fn strip_code_fences(text: &str) -> String {
    text.trim()
        .replace("```sql", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Rows as a JSON array of objects
pub fn serialize_rows(rows: &[Row]) -> Result<String> {
    Ok(serde_json::to_string(rows)?)
}

pub struct SqlSynthesizer {
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn RelationalStore>,
    direct: Arc<DirectAnswerGenerator>,
}

struct Answered {
    sql: String,
    rows: String,
    summary: String,
}

impl SqlSynthesizer {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn RelationalStore>,
        direct: Arc<DirectAnswerGenerator>,
    ) -> Self {
        Self { llm, store, direct }
    }

    pub fn build_sql_prompt(question: &str, context: &WatchContext, schema: &str) -> String {
        format!(
            "Generate an SQL query for the following question:\n\
             '{question}'\n\n\
             The target database has the following schema: {schema}.\n\n\
             If question specifies the {brand} then feel free to use this information, if needed:\n\
             {details}",
            brand = context.brand,
            details = context.details_line(),
        )
    }

    pub fn build_summary_prompt(
        sql: &str,
        question: &str,
        rows: &str,
        context: &WatchContext,
    ) -> String {
        format!(
            "Based on the SQL query:\n\
             '{sql}'\n\
             that was generated to answer the question:\n\
             '{question}'\n\
             and produced the result:\n\
             {rows}\n\
             please summarise the findings in a comprehensive and contextual manner.\n\
             {details}\n\
             Simply provide a brief and concise answer, without unnecessary details.",
            details = context.details_line(),
        )
    }

    async fn try_answer(
        &self,
        question: &str,
        context: &WatchContext,
        schema: &str,
    ) -> std::result::Result<Answered, (FallbackReason, ConciergeError)> {
        let prompt = Self::build_sql_prompt(question, context, schema);
        tracing::debug!(%prompt, "sql prompt");

        let raw = self
            .llm
            .generate(&prompt)
            .await
            .map_err(|e| (FallbackReason::Generation, e))?;

        let sql = strip_code_fences(&raw);
        if sql.is_empty() {
            return Err((
                FallbackReason::Extraction,
                ConciergeError::Extraction("model returned no SQL".to_string()),
            ));
        }
        tracing::info!(%sql, "Executing generated SQL");

        let rows = self
            .store
            .execute(&sql)
            .await
            .map_err(|e| (FallbackReason::Execution, e))?;
        if rows.is_empty() {
            return Err((FallbackReason::EmptyResult, ConciergeError::EmptyResult));
        }

        let serialized = serialize_rows(&rows).map_err(|e| (FallbackReason::Execution, e))?;

        let summary_prompt = Self::build_summary_prompt(&sql, question, &serialized, context);
        let summary = self
            .llm
            .generate(&summary_prompt)
            .await
            .map_err(|e| (FallbackReason::Summary, e))?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err((
                FallbackReason::Summary,
                ConciergeError::Generation("empty summary".to_string()),
            ));
        }

        Ok(Answered {
            sql,
            rows: serialized,
            summary,
        })
    }

    /// Answer through the catalog, falling back to a direct answer on any
    /// failure. Never returns an error.
    pub async fn synthesize(
        &self,
        question: &str,
        context: &WatchContext,
        schema: &str,
        history: &ConversationStore,
    ) -> SqlOutcome {
        match self.try_answer(question, context, schema).await {
            Ok(answered) => SqlOutcome::Answered(ConversationTurn {
                question: question.to_string(),
                sql_query: Some(answered.sql),
                query_result: Some(answered.rows),
                response: answered.summary,
            }),
            Err((reason, error)) => {
                tracing::warn!(%reason, %error, "Falling back to direct answer");
                let response = self.direct.answer(question, context, history).await;
                SqlOutcome::FellBack {
                    reason,
                    turn: ConversationTurn {
                        question: question.to_string(),
                        sql_query: None,
                        query_result: Some(NO_DATA_NOTICE.to_string()),
                        response,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockRelationalStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies in order and records every prompt it saw
    struct ScriptedModel {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(mut replies: Vec<Result<String>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(vec![]),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(ConciergeError::Generation("script exhausted".to_string())))
        }
    }

    fn rolex() -> WatchContext {
        WatchContext::new("Rolex", "$130.00", vec![])
    }

    fn rolex_rows() -> Vec<Row> {
        vec![
            json!({"brand": "Rolex", "price": 120}).as_object().unwrap().clone(),
            json!({"brand": "Rolex", "price": 150}).as_object().unwrap().clone(),
        ]
    }

    fn synthesizer(model: Arc<ScriptedModel>, store: MockRelationalStore) -> SqlSynthesizer {
        let direct = Arc::new(DirectAnswerGenerator::new(model.clone()));
        SqlSynthesizer::new(model, Arc::new(store), direct)
    }

    const SCHEMA: &str = "watches has brand of type text, watches has price of type numeric";

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT * FROM watches;\n```"),
            "SELECT * FROM watches;"
        );
        assert_eq!(strip_code_fences("  SELECT 1  "), "SELECT 1");
        assert_eq!(strip_code_fences("```\n```"), "");
    }

    #[test]
    fn test_sql_prompt_carries_schema_and_context() {
        let prompt = SqlSynthesizer::build_sql_prompt("list Rolex prices", &rolex(), SCHEMA);
        assert!(prompt.contains("'list Rolex prices'"));
        assert!(prompt.contains(&format!("following schema: {SCHEMA}.")));
        assert!(prompt.contains("If question specifies the Rolex"));
        assert!(prompt.ends_with("Watch Details: Brand - Rolex, Price - $130.00"));
    }

    #[tokio::test]
    async fn test_rows_are_serialized_and_summarized() {
        let model = ScriptedModel::new(vec![
            Ok("```sql\nSELECT brand, price FROM watches WHERE brand = 'Rolex'\n```".to_string()),
            Ok(" Two Rolex watches, priced 120 and 150. ".to_string()),
        ]);
        let mut store = MockRelationalStore::new();
        store
            .expect_execute()
            .withf(|sql| sql == "SELECT brand, price FROM watches WHERE brand = 'Rolex'")
            .times(1)
            .returning(|_| Ok(rolex_rows()));

        let outcome = synthesizer(model.clone(), store)
            .synthesize("show me all the watches from Rolex", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        assert!(!outcome.fell_back());
        let turn = outcome.into_turn();
        assert_eq!(
            turn.sql_query.as_deref(),
            Some("SELECT brand, price FROM watches WHERE brand = 'Rolex'")
        );
        let result: serde_json::Value =
            serde_json::from_str(turn.query_result.as_deref().unwrap()).unwrap();
        assert_eq!(
            result,
            json!([{"brand": "Rolex", "price": 120}, {"brand": "Rolex", "price": 150}])
        );
        assert_eq!(turn.response, "Two Rolex watches, priced 120 and 150.");

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("'SELECT brand, price FROM watches WHERE brand = 'Rolex''"));
        assert!(prompts[1].contains("\"price\":150"));
    }

    #[tokio::test]
    async fn test_empty_rows_fall_back() {
        let model = ScriptedModel::new(vec![
            Ok("SELECT * FROM watches WHERE brand = 'Zenith'".to_string()),
            Ok("Zenith watches usually start around $5,000.".to_string()),
        ]);
        let mut store = MockRelationalStore::new();
        store.expect_execute().returning(|_| Ok(vec![]));

        let outcome = synthesizer(model.clone(), store)
            .synthesize("list Zenith watches", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        assert_eq!(
            outcome,
            SqlOutcome::FellBack {
                reason: FallbackReason::EmptyResult,
                turn: ConversationTurn {
                    question: "list Zenith watches".to_string(),
                    sql_query: None,
                    query_result: Some(NO_DATA_NOTICE.to_string()),
                    response: "Zenith watches usually start around $5,000.".to_string(),
                },
            }
        );
        // second prompt is the direct-answer prompt
        assert!(model.prompts()[1].starts_with("'list Zenith watches'"));
    }

    #[tokio::test]
    async fn test_execution_error_falls_back_and_discards_sql() {
        let model = ScriptedModel::new(vec![
            Ok("SELECT nonsense FROM nowhere".to_string()),
            Ok("Here is what I know.".to_string()),
        ]);
        let mut store = MockRelationalStore::new();
        store
            .expect_execute()
            .returning(|_| Err(ConciergeError::SqlExecution("no such table: nowhere".to_string())));

        let outcome = synthesizer(model, store)
            .synthesize("q", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        match &outcome {
            SqlOutcome::FellBack { reason, turn } => {
                assert_eq!(*reason, FallbackReason::Execution);
                assert!(turn.sql_query.is_none());
                assert_eq!(turn.query_result.as_deref(), Some(NO_DATA_NOTICE));
                assert_eq!(turn.response, "Here is what I know.");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generation_error_skips_database() {
        let model = ScriptedModel::new(vec![
            Err(ConciergeError::Generation("timeout".to_string())),
            Ok("Direct.".to_string()),
        ]);
        let mut store = MockRelationalStore::new();
        store.expect_execute().never();

        let outcome = synthesizer(model, store)
            .synthesize("q", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        assert!(matches!(
            outcome,
            SqlOutcome::FellBack {
                reason: FallbackReason::Generation,
                ..
            }
        ));
        assert_eq!(outcome.turn().response, "Direct.");
    }

    #[tokio::test]
    async fn test_fence_only_output_is_extraction_failure() {
        let model = ScriptedModel::new(vec![Ok("```sql\n```".to_string()), Ok("Direct.".to_string())]);
        let mut store = MockRelationalStore::new();
        store.expect_execute().never();

        let outcome = synthesizer(model, store)
            .synthesize("q", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        assert!(matches!(
            outcome,
            SqlOutcome::FellBack {
                reason: FallbackReason::Extraction,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_summary_failure_falls_back() {
        let model = ScriptedModel::new(vec![
            Ok("SELECT * FROM watches".to_string()),
            Err(ConciergeError::Generation("rate limited".to_string())),
            Ok("Direct.".to_string()),
        ]);
        let mut store = MockRelationalStore::new();
        store.expect_execute().returning(|_| Ok(rolex_rows()));

        let outcome = synthesizer(model, store)
            .synthesize("q", &rolex(), SCHEMA, &ConversationStore::new())
            .await;

        assert!(matches!(
            outcome,
            SqlOutcome::FellBack {
                reason: FallbackReason::Summary,
                ..
            }
        ));
        assert!(outcome.turn().sql_query.is_none());
    }

    #[tokio::test]
    async fn test_fallback_with_dead_model_still_answers() {
        let model = ScriptedModel::new(vec![]);
        let mut store = MockRelationalStore::new();
        store.expect_execute().never();

        let turn = synthesizer(model, store)
            .synthesize("q", &rolex(), SCHEMA, &ConversationStore::new())
            .await
            .into_turn();

        assert_eq!(turn.response, crate::answer::APOLOGY);
        assert_eq!(turn.query_result.as_deref(), Some(NO_DATA_NOTICE));
    }
}
