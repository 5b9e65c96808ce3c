use crate::core::auth::UserInfo;
use crate::core::config::AppState;
use crate::core::ctx::Ctx;
use crate::core::error::Result;
use axum::extract::State;
use axum::Json;

/// GET /api/auth/me
pub async fn me(State(state): State<AppState>, ctx: Ctx) -> Result<Json<UserInfo>> {
    // If we are here, 'ctx' contains a valid user_id confirmed by middleware.
    let mut user = state.auth.get_user(ctx.user_id()).await?;
    user.is_online = state.relay.registry().is_online(&user.id);

    Ok(Json(user))
}
