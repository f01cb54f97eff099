use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ConciergeError;
use crate::models::{ConversationTurn, ErrorBody};
use crate::service::{ConciergeService, ConversationView};

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const NO_SESSION_MESSAGE: &str = "No watch data found. Please go back and upload an image.";

pub type AppState = Arc<ConciergeService>;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub predicted_class: String,
    pub confidence: f64,
    pub price: String,
}

/// Error wrapper that renders as `{"error": ...}` with a fitting status
pub struct ApiError(ConciergeError);

impl From<ConciergeError> for ApiError {
    fn from(e: ConciergeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ConciergeError::SessionNotFound(_) => {
                (StatusCode::NOT_FOUND, NO_SESSION_MESSAGE.to_string())
            }
            ConciergeError::Validation { reason, .. } => (StatusCode::BAD_REQUEST, reason.clone()),
            ConciergeError::UpstreamPrediction { status, message } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                message.clone(),
            ),
            ConciergeError::Http(e) => (
                StatusCode::BAD_GATEWAY,
                format!("Error making prediction request: {e}"),
            ),
            other => {
                tracing::error!("Request failed: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// First multipart field called `name`, as (bytes, file name)
async fn read_field(
    multipart: &mut Multipart,
    name: &str,
) -> Result<Option<(Vec<u8>, String)>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ConciergeError::validation(name, e.body_text()))?
    {
        if field.name() != Some(name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ConciergeError::validation(name, e.body_text()))?;
        return Ok(Some((bytes.to_vec(), file_name)));
    }
    Ok(None)
}

async fn health() -> &'static str {
    "ok"
}

/// Pass-through proxy: relays the prediction service's status and body
async fn upload(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let Some((bytes, file_name)) = read_field(&mut multipart, "file").await? else {
        return Err(ConciergeError::validation("file", "No file provided").into());
    };

    let relayed = service.predictor().forward_upload(bytes, &file_name).await?;
    tracing::info!(status = relayed.status, "Relayed upload");

    let status = StatusCode::from_u16(relayed.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, relayed.body).into_response();
    if let Some(content_type) = relayed
        .content_type
        .and_then(|v| header::HeaderValue::from_str(&v).ok())
    {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

async fn create_session(
    State(service): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SessionCreated>, ApiError> {
    let Some((image, file_name)) = read_field(&mut multipart, "image").await? else {
        return Err(ConciergeError::validation("image", "No image file provided").into());
    };

    let (session_id, prediction) = service.start_session(image, &file_name).await?;
    Ok(Json(SessionCreated {
        session_id,
        predicted_class: prediction.predicted_class,
        confidence: prediction.confidence,
        price: prediction.price,
    }))
}

async fn ask(
    State(service): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AskRequest>,
) -> Result<Json<ConversationTurn>, ApiError> {
    Ok(Json(service.ask(session_id, &req.question).await?))
}

async fn conversation(
    State(service): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<ConversationView>, ApiError> {
    Ok(Json(service.conversation(session_id).await?))
}

async fn require_bearer(
    State(expected): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    let headers: &HeaderMap = req.headers();
    let by_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", expected.as_str()));
    // Clients that cannot set headers may pass access_token or token in the query
    let by_query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .ok()
        .is_some_and(|Query(params)| {
            ["access_token", "token"]
                .iter()
                .any(|key| params.get(*key).is_some_and(|v| v == expected.as_str()))
        });
    if !(by_header || by_query) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}

pub fn router(service: AppState, bearer_token: Option<String>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/sessions", post(create_session))
        .route("/sessions/:id/ask", post(ask))
        .route("/sessions/:id/conversation", get(conversation))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service);

    if let Some(expected) = bearer_token {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(expected),
            require_bearer,
        ));
    }
    router
}
