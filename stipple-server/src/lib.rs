use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use stipple_core::{generate_images, images_to_base64, GenerationRequest, ModelProvider};
use thiserror::Error;
use tracing::{error, info};

#[derive(Serialize, Deserialize, Debug)]
pub struct Txt2ImgResponse {
    pub images: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The body did not deserialize into a request.
    #[error("{0}")]
    Validation(String),
    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(e) => {
                error!(error = ?e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorBody { detail: self.to_string() })).into_response()
    }
}

/// Shared handle to the one pipeline of this process.
#[derive(Clone)]
pub struct AppState(pub Arc<ModelProvider>);

async fn ping() -> &'static str {
    "pong"
}

async fn txt2img(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<Txt2ImgResponse>, ApiError> {
    let Json(request) = payload?;
    info!(
        batch_size = request.batch_size,
        steps = request.num_inference_steps,
        width = request.width,
        height = request.height,
        "txt2img"
    );

    let model = state.0.get().await?;
    // Inference blocks; keep it off the async workers so /ping stays live.
    let images = tokio::task::spawn_blocking(move || {
        let images = generate_images(model.as_ref(), &request)?;
        images_to_base64(&images)
    })
    .await
    .map_err(anyhow::Error::from)??;

    Ok(Json(Txt2ImgResponse { images }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/txt2img", post(txt2img))
        .route("/ping", get(ping))
        .with_state(state)
}
