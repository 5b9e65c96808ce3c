//! User directory handlers

use crate::core::auth::UserInfo;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

/// GET /api/users
///
/// Everyone except the caller, online users first, then by username.
pub async fn list_users(State(state): State<AppState>, ctx: Ctx) -> Result<Json<Vec<UserInfo>>> {
    info!("GET /api/users - {}", ctx.user_id());

    let online = state.relay.registry().snapshot();
    let mut users = state.auth.list_users_except(ctx.user_id()).await?;
    for user in &mut users {
        user.is_online = online.contains(&user.id);
    }
    users.sort_by(|a, b| {
        b.is_online
            .cmp(&a.is_online)
            .then_with(|| a.username.cmp(&b.username))
    });

    Ok(Json(users))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    _ctx: Ctx,
    Path(user_id): Path<String>,
) -> Result<Json<UserInfo>> {
    let mut user = state.auth.get_user(&user_id).await?;
    user.is_online = state.relay.registry().is_online(&user.id);
    Ok(Json(user))
}
