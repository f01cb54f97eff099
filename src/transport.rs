use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::{ConciergeError, Result};
use crate::models::{ChatRequest, ChatResponse};

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const MAX_RETRY_DURATION: Duration = Duration::from_secs(300);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

pub struct GroqTransport {
    client: Client,
    api_key: String,
    url: String,
    retry: RetryConfig,
}

impl GroqTransport {
    pub fn new(api_key: String, retry: RetryConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            api_key,
            url: GROQ_API_URL.to_string(),
            retry,
        })
    }

    /// Point the transport at another OpenAI-compatible endpoint
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.initial_delay_ms as f64
            * self.retry.backoff_base.powi(attempt.saturating_sub(1) as i32);
        let spread = self.retry.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread))
        } else {
            1.0
        };
        let delay = Duration::from_millis((base * jitter) as u64);
        std::cmp::min(delay, Duration::from_millis(self.retry.max_delay_ms))
    }
}

#[async_trait]
impl Transport for GroqTransport {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let start_time = Instant::now();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempts = 0;

        while attempts < max_attempts {
            if start_time.elapsed() > MAX_RETRY_DURATION {
                return Err(ConciergeError::Generation(format!(
                    "chat request timed out after {} seconds (max retry duration exceeded)",
                    MAX_RETRY_DURATION.as_secs()
                )));
            }

            attempts += 1;

            match self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(req)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        return response.json().await.map_err(|e| {
                            ConciergeError::Generation(format!(
                                "Failed to parse chat completion response: {e}"
                            ))
                        });
                    }

                    let status = response.status();
                    tracing::warn!(%status, attempt = attempts, "chat completion rejected");
                    if attempts >= max_attempts {
                        return Err(ConciergeError::Generation(format!(
                            "chat API error after {} attempts: {}",
                            attempts,
                            response
                                .text()
                                .await
                                .unwrap_or_else(|_| "Unknown error".to_string())
                        )));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt = attempts, "chat request failed");
                    if attempts >= max_attempts {
                        return Err(ConciergeError::Generation(format!(
                            "Failed to send chat request after {attempts} attempts: {e}"
                        )));
                    }
                }
            }

            if attempts < max_attempts {
                sleep(self.backoff_delay(attempts)).await;
            }
        }

        Err(ConciergeError::Generation(format!(
            "chat request failed after {max_attempts} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(jitter: f64) -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_base: 2.0,
            jitter_factor: jitter,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let transport = GroqTransport::new("key".to_string(), retry(0.0)).unwrap();
        assert_eq!(transport.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(transport.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(transport.backoff_delay(3), Duration::from_millis(350));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let transport = GroqTransport::new("key".to_string(), retry(0.2)).unwrap();
        for _ in 0..20 {
            let d = transport.backoff_delay(1).as_millis();
            assert!((80..=120).contains(&d), "delay {d} out of band");
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_generation_error() {
        let mut cfg = retry(0.0);
        cfg.max_attempts = 1;
        let transport = GroqTransport::new("key".to_string(), cfg)
            .unwrap()
            .with_url("http://127.0.0.1:9/v1/chat/completions");
        let req = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: 0.0,
            max_tokens: 10,
        };
        let err = transport.chat(&req).await.unwrap_err();
        assert!(matches!(err, ConciergeError::Generation(_)));
    }
}
