//! Image generation handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use atelier_core::{GenerationId, GenerationRecord, GenerationStatus};

use super::{default_limit, MAX_PAGE_SIZE};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::orchestrator::GenerationOutcome;
use crate::state::AppState;

/// Generate request.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Prompt text.
    #[serde(default)]
    pub prompt: String,
    /// Optional negative prompt.
    #[serde(default, alias = "negativePrompt")]
    pub negative_prompt: Option<String>,
}

/// Generate response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// Whether an image was produced.
    pub success: bool,
    /// The generation record.
    pub generation_id: String,
    /// Data URI or URL of the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Failure message. The cost has been refunded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generate an image, charging the generation cost.
///
/// A provider failure answers 502 with `success: false` after the refund.
pub async fn create_generation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>), ApiError> {
    let outcome = state
        .orchestrator
        .submit(
            auth.account_id,
            &request.prompt,
            request.negative_prompt.as_deref(),
        )
        .await?;

    let (status, body) = match outcome {
        GenerationOutcome::Completed {
            generation_id,
            image_ref,
        } => (
            StatusCode::OK,
            GenerateResponse {
                success: true,
                generation_id: generation_id.to_string(),
                image_ref: Some(image_ref),
                error: None,
            },
        ),
        GenerationOutcome::Failed {
            generation_id,
            error,
        } => (
            StatusCode::BAD_GATEWAY,
            GenerateResponse {
                success: false,
                generation_id: generation_id.to_string(),
                image_ref: None,
                error: Some(error),
            },
        ),
    };

    Ok((status, Json(body)))
}

/// Generation record response.
#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    /// Generation ID.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
    /// Negative prompt.
    pub negative_prompt: Option<String>,
    /// Provider model.
    pub model: String,
    /// Lifecycle status.
    pub status: GenerationStatus,
    /// Data URI or URL of the image.
    pub image_ref: Option<String>,
    /// Credits charged.
    pub cost: i64,
    /// Failure message.
    pub error_message: Option<String>,
    /// Created timestamp.
    pub created_at: String,
    /// Settlement timestamp.
    pub completed_at: Option<String>,
}

impl From<&GenerationRecord> for GenerationResponse {
    fn from(record: &GenerationRecord) -> Self {
        Self {
            id: record.id.to_string(),
            prompt: record.prompt.clone(),
            negative_prompt: record.negative_prompt.clone(),
            model: record.model.clone(),
            status: record.status,
            image_ref: record.image_ref.clone(),
            cost: record.cost,
            error_message: record.error_message.clone(),
            created_at: record.created_at.to_rfc3339(),
            completed_at: record.completed_at.map(|at| at.to_rfc3339()),
        }
    }
}

/// Generation list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListGenerationsQuery {
    /// Maximum number of records to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

/// List generations response.
#[derive(Debug, Serialize)]
pub struct ListGenerationsResponse {
    /// Records (newest first).
    pub generations: Vec<GenerationResponse>,
    /// Whether there are more records.
    pub has_more: bool,
}

/// List the authenticated user's generations.
pub async fn list_generations(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListGenerationsQuery>,
) -> Result<Json<ListGenerationsResponse>, ApiError> {
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let records = state
        .records
        .list_generations(&auth.account_id, limit + 1, query.offset)
        .await?;

    let has_more = records.len() > limit;
    let generations = records
        .iter()
        .take(limit)
        .map(GenerationResponse::from)
        .collect();

    Ok(Json(ListGenerationsResponse {
        generations,
        has_more,
    }))
}

/// Get one generation owned by the authenticated user.
pub async fn get_generation(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(generation_id): Path<String>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let not_found = || ApiError::NotFound("Generation not found".into());
    let generation_id: GenerationId = generation_id.parse().map_err(|_| not_found())?;

    // Records owned by other accounts are reported as missing.
    let record = state
        .records
        .get_generation(&generation_id)
        .await?
        .filter(|record| record.account_id == auth.account_id)
        .ok_or_else(not_found)?;

    Ok(Json(GenerationResponse::from(&record)))
}
