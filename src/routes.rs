use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

use crate::archive;
use crate::gateway::{GatewayError, GenerationRequest};
use crate::models::{
    AiEditSession, AnalyzeImageRequest, CaptionRequest, EditingRequest, GenerateRequest, OpenAiEditRequest, Output,
    PromptRequest, Round, SessionView, Settings, SettingsPatch, SourceImage, SourceImageError, UploadImageRequest,
};
use crate::presets::{self, PresetCatalog};
use crate::studio::{Studio, StudioError};

#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
}

/// Error body shared by every endpoint: `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::InvalidInput(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            _ => {
                tracing::error!("Gateway error: {}", e);
                Self::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
        }
    }
}

impl From<StudioError> for ApiError {
    fn from(e: StudioError) -> Self {
        match e {
            StudioError::Gateway(e) => e.into(),
            StudioError::NotFound(_) | StudioError::NoEditSession => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            StudioError::EditSuperseded => Self::new(StatusCode::CONFLICT, e.to_string()),
            _ => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
}

impl From<SourceImageError> for ApiError {
    fn from(e: SourceImageError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("invalid image: {e}"))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/generate_caption", post(generate_caption))
        .route("/api/analyze_image", post(analyze_image))
        .route("/api/session", get(get_session))
        .route("/api/presets", get(get_presets))
        .route("/api/settings", put(update_settings))
        .route("/api/settings/image", put(set_uploaded_image))
        .route("/api/settings/image/raw", post(upload_raw_image))
        .route("/api/rounds", post(create_round))
        .route("/api/rounds/:id", delete(remove_round))
        .route("/api/rounds/:id/rerun", post(rerun_round))
        .route("/api/rounds/:id/archive", get(download_round))
        .route("/api/rounds/:id/outputs/:output_id/regenerate", post(regenerate_output))
        .route("/api/rounds/:id/outputs/:output_id/editing", put(set_output_editing))
        .route("/api/reset", post(reset))
        .route("/api/history", get(get_history).delete(clear_history))
        .route("/api/history/:id", delete(delete_from_history))
        .route("/api/history/:id/restore", post(restore_from_history))
        .route("/api/ai-edit", post(open_ai_edit).delete(close_ai_edit))
        .route("/api/ai-edit/apply", post(apply_ai_edit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// --- Gateway contract ---

pub async fn generate(State(state): State<AppState>, Json(body): Json<GenerateRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let image = body.image.as_deref().map(SourceImage::from_data_url).transpose()?;
    let request = GenerationRequest { model: presets::model_string(&body.model), prompt: body.prompt, image };
    let data = state.studio.gateway().generate(&request).await?;
    Ok(Json(json!({ "data": data })))
}

pub async fn generate_caption(State(state): State<AppState>, Json(body): Json<CaptionRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let caption = state.studio.gateway().caption(&body.prompt).await?;
    Ok(Json(json!({ "caption": caption })))
}

pub async fn analyze_image(State(state): State<AppState>, Json(body): Json<AnalyzeImageRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let url = body
        .image
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Image data is required."))?;
    let image = SourceImage::from_data_url(&url)?;
    let description = state.studio.describe_image(&image).await?;
    Ok(Json(json!({ "description": description })))
}

// --- Session ---

pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.studio.store().view())
}

pub async fn get_presets() -> Json<PresetCatalog> {
    Json(presets::catalog())
}

pub async fn update_settings(State(state): State<AppState>, Json(body): Json<SettingsPatch>) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.studio.update_settings(body)?))
}

pub async fn set_uploaded_image(State(state): State<AppState>, Json(body): Json<UploadImageRequest>) -> Result<Json<Settings>, ApiError> {
    let image = body.image.as_deref().map(SourceImage::from_data_url).transpose()?;
    Ok(Json(state.studio.set_uploaded_image(image)))
}

pub async fn upload_raw_image(State(state): State<AppState>, body: Bytes) -> Result<Json<Settings>, ApiError> {
    let image = SourceImage::from_bytes(&body)?;
    tracing::info!("📎 Uploaded {} image ({} bytes)", image.mime_type, body.len());
    Ok(Json(state.studio.set_uploaded_image(Some(image))))
}

pub async fn create_round(State(state): State<AppState>, Json(body): Json<PromptRequest>) -> Result<(StatusCode, Json<Round>), ApiError> {
    let dispatch = state.studio.create_round(&body.prompt)?;
    Ok((StatusCode::ACCEPTED, Json(dispatch.detach())))
}

pub async fn rerun_round(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<(StatusCode, Json<Round>), ApiError> {
    let dispatch = state.studio.rerun_round(id)?;
    Ok((StatusCode::ACCEPTED, Json(dispatch.detach())))
}

pub async fn download_round(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let round = state
        .studio
        .store()
        .read(|s| s.round(id).cloned())
        .ok_or_else(|| ApiError::not_found("round"))?;
    let bytes = archive::round_archive(&round)
        .map_err(|e| {
            tracing::error!("Failed to build archive for round {}: {}", id, e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?
        .ok_or_else(|| ApiError::not_found("finished image"))?;
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", archive::file_name(&round))),
    ];
    Ok((StatusCode::OK, headers, bytes).into_response())
}

pub async fn remove_round(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    if state.studio.remove_round(id) { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
}

pub async fn regenerate_output(
    Path((round_id, output_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    Json(body): Json<PromptRequest>,
) -> Result<(StatusCode, Json<Output>), ApiError> {
    let dispatch = state
        .studio
        .regenerate_output(round_id, output_id, &body.prompt)
        .ok_or_else(|| ApiError::not_found("output"))?;
    Ok((StatusCode::ACCEPTED, Json(dispatch.detach())))
}

pub async fn set_output_editing(
    Path((round_id, output_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    Json(body): Json<EditingRequest>,
) -> StatusCode {
    if state.studio.set_output_editing(round_id, output_id, body.editing) { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
}

pub async fn reset(State(state): State<AppState>) -> Json<serde_json::Value> {
    let archived = state.studio.reset();
    Json(json!({ "archived": archived }))
}

// --- History ---

pub async fn get_history(State(state): State<AppState>) -> Json<Vec<Round>> {
    Json(state.studio.history())
}

pub async fn restore_from_history(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Round>, ApiError> {
    Ok(Json(state.studio.restore_from_history(id)?))
}

pub async fn delete_from_history(Path(id): Path<Uuid>, State(state): State<AppState>) -> StatusCode {
    if state.studio.delete_from_history(id) { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND }
}

pub async fn clear_history(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.studio.clear_history();
    Json(json!({ "cleared": cleared }))
}

// --- AI edit ---

pub async fn open_ai_edit(State(state): State<AppState>, Json(body): Json<OpenAiEditRequest>) -> Result<Json<AiEditSession>, ApiError> {
    Ok(Json(state.studio.open_ai_edit(body.round_id, body.output_id)?))
}

pub async fn apply_ai_edit(State(state): State<AppState>, Json(body): Json<PromptRequest>) -> Result<Json<serde_json::Value>, ApiError> {
    let data = state.studio.apply_ai_edit(&body.prompt).await?;
    Ok(Json(json!({ "data": data })))
}

pub async fn close_ai_edit(State(state): State<AppState>) -> StatusCode {
    state.studio.close_ai_edit();
    StatusCode::NO_CONTENT
}
