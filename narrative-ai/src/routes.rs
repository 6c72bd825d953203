//! HTTP handlers.

use crate::error::{ApiError, ApiJson};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use narrative_core::{ChoicesRequest, ChoicesResult, NarrativeResult, SceneRequest, StorySnapshot};
use serde_json::{json, Value};
use tracing::info;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "narrative-ai",
    }))
}

pub async fn generate_scene(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SceneRequest>,
) -> Result<ApiJson<NarrativeResult>, ApiError> {
    info!(
        story_id = %request.story_id,
        previous_choice = ?request.previous_choice,
        "scene requested"
    );
    let result = state.service.generate_scene(request).await?;
    Ok(ApiJson(result))
}

pub async fn generate_choices(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ChoicesRequest>,
) -> Result<ApiJson<ChoicesResult>, ApiError> {
    info!(
        story_id = %request.story_id,
        current_scene = %request.current_scene,
        "choices requested"
    );
    let result = state.service.generate_choices(request).await?;
    Ok(ApiJson(result))
}

pub async fn get_story(
    State(state): State<AppState>,
    Path(story_id): Path<String>,
) -> Result<ApiJson<StorySnapshot>, ApiError> {
    let snapshot = state.service.get_story_state(&story_id).await?;
    Ok(ApiJson(snapshot))
}
