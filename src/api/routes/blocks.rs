//! Block Routes
//!
//! - GET /api/v1/blocks - List registered blocks
//! - GET /api/v1/blocks/:id - Get one block

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{BlockDto, BlockListResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::block::BlockId;

/// GET /api/v1/blocks
pub async fn list_blocks(State(state): State<Arc<AppState>>) -> ApiResult<Json<BlockListResponse>> {
    let blocks: Vec<BlockDto> = state
        .registry
        .snapshot()?
        .iter()
        .map(|b| BlockDto::from(b.as_ref()))
        .collect();

    Ok(Json(BlockListResponse {
        total: blocks.len(),
        blocks,
    }))
}

/// GET /api/v1/blocks/:id
pub async fn get_block(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<BlockDto>> {
    let id = BlockId::parse(&id).map_err(|e| ApiError::Validation(e.to_string()))?;

    let block = state
        .registry
        .get(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("Block '{}'", id)))?;

    Ok(Json(BlockDto::from(block.as_ref())))
}
