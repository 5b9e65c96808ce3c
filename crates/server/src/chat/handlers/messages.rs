//! Message history handlers

use crate::chat::messages::{Message, SoftDelete, DEFAULT_HISTORY_LIMIT};
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::{Error, Result};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// GET /api/messages/{user_id}
pub async fn conversation(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>> {
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(DEFAULT_HISTORY_LIMIT);
    let messages = state
        .messages
        .conversation(ctx.user_id(), &user_id, limit)
        .await?;
    Ok(Json(messages))
}

/// PUT /api/messages/read/{user_id}
///
/// Marks everything `user_id` sent to the caller as read.
pub async fn mark_read(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(user_id): Path<String>,
) -> Result<Json<MarkReadResponse>> {
    let updated = state.messages.mark_read(&user_id, ctx.user_id()).await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// DELETE /api/messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(message_id): Path<String>,
) -> Result<Json<Value>> {
    match state.messages.soft_delete(&message_id, ctx.user_id()).await? {
        SoftDelete::Hidden { fully_deleted } => Ok(Json(json!({
            "message": "Message deleted",
            "fully_deleted": fully_deleted,
        }))),
        SoftDelete::NotFound => Err(Error::NotFound("Message not found".to_string())),
        SoftDelete::Forbidden => Err(Error::Forbidden(
            "Not authorized to delete this message".to_string(),
        )),
    }
}
