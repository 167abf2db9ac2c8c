//! Community gallery handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use atelier_core::GenerationId;
use atelier_store::{GalleryItem, LikeState};

use super::{default_limit, MAX_PAGE_SIZE};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Gallery query parameters.
#[derive(Debug, Deserialize)]
pub struct GalleryQuery {
    /// Maximum number of items to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// One gallery entry.
#[derive(Debug, Serialize)]
pub struct GalleryItemResponse {
    /// Generation ID.
    pub id: String,
    /// Prompt text.
    pub prompt: String,
    /// Data URI or URL of the image.
    pub image_ref: Option<String>,
    /// Provider model.
    pub model: String,
    /// Number of likes.
    pub likes: u64,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&GalleryItem> for GalleryItemResponse {
    fn from(item: &GalleryItem) -> Self {
        Self {
            id: item.record.id.to_string(),
            prompt: item.record.prompt.clone(),
            image_ref: item.record.image_ref.clone(),
            model: item.record.model.clone(),
            likes: item.likes,
            created_at: item.record.created_at.to_rfc3339(),
        }
    }
}

/// Gallery response.
#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    /// Completed generations, newest first.
    pub items: Vec<GalleryItemResponse>,
}

/// List completed generations with like counts. Public.
pub async fn list_gallery(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GalleryQuery>,
) -> Result<Json<GalleryResponse>, ApiError> {
    let items = state
        .gallery
        .gallery(query.limit.min(MAX_PAGE_SIZE))
        .await?;

    Ok(Json(GalleryResponse {
        items: items.iter().map(GalleryItemResponse::from).collect(),
    }))
}

/// Like a generation, or remove the like if already given.
pub async fn toggle_like(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(generation_id): Path<String>,
) -> Result<Json<LikeState>, ApiError> {
    let generation_id: GenerationId = generation_id
        .parse()
        .map_err(|_| ApiError::NotFound("Generation not found".into()))?;

    let like = state
        .gallery
        .toggle_like(&auth.account_id, &generation_id)
        .await?;

    tracing::debug!(
        account_id = %auth.account_id,
        generation_id = %generation_id,
        liked = like.liked,
        likes = like.count,
        "Like toggled"
    );

    Ok(Json(like))
}
