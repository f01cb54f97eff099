use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::embeddings::{Encoder, cosine_similarity};
use crate::error::{ConciergeError, Result};
use crate::models::{Route, RouteDecision, RouteName, WILDCARD_EXEMPLAR};

/// The route table, in tie-break order.
pub fn default_routes() -> Vec<Route> {
    vec![
        Route::new(
            RouteName::SqlQuery,
            &[
                "show me all the watches from Rolex",
                "list the price history of Omega Seamaster",
                "find the latest news about Breitling",
                "retrieve the details of the Tag Heuer Carrera",
                "fetch the information about the most expensive watch",
                "can you show me the top 10 best-selling watches",
                "what are the latest trends in watch prices",
                "give me the summary of the latest watch releases",
                "display the details of vintage Patek Philippe watches",
                "how have the prices of Audemars Piguet watches changed over the years",
                "show the reviews of the latest watch models",
                "list the watches released in 2023",
                "find the total number of watches available from Seiko",
                "retrieve the list of watches with the highest ratings",
                "fetch the recent news about watch industry trends",
            ],
        ),
        Route::new(
            RouteName::Chitchat,
            &[
                "how's the weather today?",
                "how are things going?",
                "lovely weather today",
                "the weather is horrendous",
                "let's go to the chippy",
            ],
        ),
        Route::new(RouteName::GeneralQuery, &[WILDCARD_EXEMPLAR]),
    ]
}

struct RouteIndex {
    name: RouteName,
    wildcard: bool,
    vectors: Vec<Vec<f32>>,
}

/// Nearest-exemplar intent classifier.
///
/// Exemplar vectors are computed on first use and reused afterwards. The
/// wildcard exemplar is never encoded; it scores `baseline_score`.
pub struct IntentRouter {
    encoder: Arc<dyn Encoder>,
    routes: Arc<[Route]>,
    baseline_score: f64,
    index: OnceCell<Vec<RouteIndex>>,
}

impl IntentRouter {
    pub fn new(encoder: Arc<dyn Encoder>, routes: Arc<[Route]>, baseline_score: f64) -> Self {
        Self {
            encoder,
            routes,
            baseline_score,
            index: OnceCell::new(),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encoder.encode(text).await.map_err(|e| match e {
            ConciergeError::Encoding(_) => e,
            other => ConciergeError::Encoding(other.to_string()),
        })
    }

    async fn index(&self) -> Result<&Vec<RouteIndex>> {
        self.index
            .get_or_try_init(|| async {
                let mut index = Vec::with_capacity(self.routes.len());
                for route in self.routes.iter() {
                    let mut vectors = Vec::new();
                    for exemplar in route.exemplars.iter().filter(|e| *e != WILDCARD_EXEMPLAR) {
                        vectors.push(self.encode(exemplar).await?);
                    }
                    index.push(RouteIndex {
                        name: route.name,
                        wildcard: route.is_wildcard(),
                        vectors,
                    });
                }
                tracing::info!(routes = index.len(), "Route exemplars encoded");
                Ok::<_, ConciergeError>(index)
            })
            .await
    }

    /// Classify an utterance. Exact ties go to the route declared first.
    pub async fn classify(&self, utterance: &str) -> Result<RouteDecision> {
        let index = self.index().await?;
        let query = self.encode(utterance).await?;

        let mut best: Option<RouteDecision> = None;
        for route in index {
            let exemplar_best = route
                .vectors
                .iter()
                .map(|v| cosine_similarity(&query, v))
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));

            let score = match (route.wildcard, exemplar_best) {
                (true, Some(s)) => s.max(self.baseline_score),
                (true, None) => self.baseline_score,
                (false, Some(s)) => s,
                (false, None) => continue,
            };

            if best.is_none_or(|b| score > b.score) {
                best = Some(RouteDecision {
                    route: route.name,
                    score,
                });
            }
        }

        let decision = best.unwrap_or(RouteDecision {
            route: RouteName::GeneralQuery,
            score: 0.0,
        });
        tracing::info!(route = %decision.route, score = decision.score, "Classified utterance");
        Ok(decision)
    }
}
