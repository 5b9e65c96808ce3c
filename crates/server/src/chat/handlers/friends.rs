//! Friend Request Handlers

use crate::chat::friends::{FriendRequest, UserSearchResult};
use crate::core::auth::UserInfo;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// GET /api/friends
pub async fn list_friends(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<UserInfo>>> {
    let registry = state.relay.registry();
    let mut friends = state.friends.friends(ctx.user_id()).await?;
    for friend in &mut friends {
        friend.is_online = registry.is_online(&friend.id);
    }
    Ok(Json(friends))
}

/// GET /api/friends/search?q=
pub async fn search_users(
    State(state): State<AppState>,
    ctx: Ctx,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserSearchResult>>> {
    let registry = state.relay.registry();
    let mut results = state.friends.search(ctx.user_id(), &query.q).await?;
    for result in &mut results {
        result.user.is_online = registry.is_online(&result.user.id);
    }
    Ok(Json(results))
}

/// GET /api/friends/requests/pending
pub async fn pending_requests(
    State(state): State<AppState>,
    ctx: Ctx,
) -> Result<Json<Vec<FriendRequest>>> {
    Ok(Json(state.friends.pending(ctx.user_id()).await?))
}

/// POST /api/friends/request/{user_id}
pub async fn send_request(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<FriendRequest>)> {
    info!("POST /api/friends/request/{} - {}", user_id, ctx.user_id());
    let request = state.friends.send_request(ctx.user_id(), &user_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// PUT /api/friends/accept/{request_id}
pub async fn accept_request(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(request_id): Path<String>,
) -> Result<Json<FriendRequest>> {
    Ok(Json(state.friends.accept(&request_id, ctx.user_id()).await?))
}

/// PUT /api/friends/reject/{request_id}
pub async fn reject_request(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(request_id): Path<String>,
) -> Result<Json<FriendRequest>> {
    Ok(Json(state.friends.reject(&request_id, ctx.user_id()).await?))
}

/// DELETE /api/friends/{user_id}
pub async fn remove_friend(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(user_id): Path<String>,
) -> Result<StatusCode> {
    info!("DELETE /api/friends/{} - {}", user_id, ctx.user_id());
    state.friends.remove(ctx.user_id(), &user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
