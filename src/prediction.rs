use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

use crate::error::{ConciergeError, Result};
use crate::models::{ErrorBody, Prediction};

/// Raw upstream reply, relayed unchanged by the upload proxy
#[derive(Debug, Clone)]
pub struct RelayedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Client for the brand/price prediction service
#[derive(Clone)]
pub struct PredictionClient {
    client: Client,
    base_url: String,
}

impl PredictionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn predict_url(&self) -> String {
        format!("{}/predict", self.base_url)
    }

    fn form(image: Vec<u8>, file_name: &str) -> Form {
        Form::new().part("image", Part::bytes(image).file_name(file_name.to_string()))
    }

    /// Send an image to `POST /predict` and decode the prediction
    pub async fn predict(&self, image: Vec<u8>, file_name: &str) -> Result<Prediction> {
        tracing::info!(bytes = image.len(), file_name, "Requesting prediction");

        let response = self
            .client
            .post(self.predict_url())
            .multipart(Self::form(image, file_name))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let prediction: Prediction = response.json().await?;
            tracing::info!(
                brand = %prediction.predicted_class,
                price = %prediction.price,
                confidence = prediction.confidence,
                "Prediction received"
            );
            return Ok(prediction);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        tracing::warn!(%status, %message, "Prediction service rejected the image");
        Err(ConciergeError::UpstreamPrediction {
            status: status.as_u16(),
            message,
        })
    }

    /// Forward an upload to the prediction service without interpreting the reply
    pub async fn forward_upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<RelayedResponse> {
        let response = self
            .client
            .post(self.predict_url())
            .multipart(Self::form(bytes, file_name))
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        Ok(RelayedResponse {
            status,
            content_type,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn fake_predict(mut multipart: Multipart) -> axum::response::Response {
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some("image") {
                let bytes = field.bytes().await.unwrap_or_default();
                if bytes.is_empty() {
                    break;
                }
                return Json(json!({
                    "predicted_class": "Omega",
                    "confidence": 0.87,
                    "price": "$420.00"
                }))
                .into_response();
            }
        }
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No image file provided"})),
        )
            .into_response()
    }

    /// Starts a stand-in prediction service and returns its base URL
    pub(crate) async fn spawn_fake_predictor() -> String {
        let app = Router::new().route("/predict", post(fake_predict));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_predict_decodes_success() {
        let client = PredictionClient::new(spawn_fake_predictor().await).unwrap();
        let prediction = client.predict(vec![1, 2, 3], "watch.jpg").await.unwrap();
        assert_eq!(prediction.predicted_class, "Omega");
        assert_eq!(prediction.price, "$420.00");
        assert!((prediction.confidence - 0.87).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_predict_surfaces_upstream_error() {
        let client = PredictionClient::new(spawn_fake_predictor().await).unwrap();
        let err = client.predict(vec![], "empty.jpg").await.unwrap_err();
        match err {
            ConciergeError::UpstreamPrediction { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "No image file provided");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forward_upload_relays_verbatim() {
        let client = PredictionClient::new(spawn_fake_predictor().await).unwrap();

        let ok = client.forward_upload(vec![7; 8], "w.jpg").await.unwrap();
        assert_eq!(ok.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&ok.body).unwrap();
        assert_eq!(body["predicted_class"], "Omega");

        let bad = client.forward_upload(vec![], "w.jpg").await.unwrap();
        assert_eq!(bad.status, 400);
        assert_eq!(
            bad.content_type.as_deref(),
            Some("application/json")
        );
    }
}
