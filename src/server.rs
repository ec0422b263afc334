//! HTTP surface: routes, CORS, and request tracing.

use crate::app::App;
use crate::blob::local::LOCAL_IMAGE_ROUTE;
use crate::error::{PipelineError, Stage};
use crate::models::{GenerationRequest, PublishedImage};
use crate::Error;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    /// Directory served under `/api/generated_images` in local publish mode.
    pub local_image_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(app: App) -> Self {
        Self {
            app: Arc::new(app),
            local_image_dir: None,
        }
    }

    pub fn with_local_image_dir(mut self, dir: PathBuf) -> Self {
        self.local_image_dir = Some(dir);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/api/image_generator", post(generate_image))
        .route("/api/generate-image", post(generate_image));

    if let Some(dir) = &state.local_image_dir {
        router = router.nest_service(LOCAL_IMAGE_ROUTE, ServeDir::new(dir));
    }

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Json<PublishedImage>, PipelineError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::warn!("Rejected request body: {}", rejection.body_text());
        PipelineError::new(
            Stage::Validation,
            Error::MalformedBody(rejection.body_text()),
        )
    })?;

    let image = state.app.generate(&request).await?;
    Ok(Json(image))
}
