//! Chat Service Layer
//!
//! REST side of messaging: the user directory, friendships and message
//! history. Live delivery goes through [`crate::relay`].

pub mod friends;
pub mod handlers;
pub mod messages;

use crate::core::auth::middleware::mw_require_auth;
use crate::core::AppState;
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/users", get(handlers::users::list_users))
        .route("/api/users/{id}", get(handlers::users::get_user))
        .route("/api/friends", get(handlers::friends::list_friends))
        .route("/api/friends/search", get(handlers::friends::search_users))
        .route(
            "/api/friends/requests/pending",
            get(handlers::friends::pending_requests),
        )
        .route(
            "/api/friends/request/{user_id}",
            post(handlers::friends::send_request),
        )
        .route(
            "/api/friends/accept/{request_id}",
            put(handlers::friends::accept_request),
        )
        .route(
            "/api/friends/reject/{request_id}",
            put(handlers::friends::reject_request),
        )
        .route(
            "/api/friends/{user_id}",
            delete(handlers::friends::remove_friend),
        )
        // GET takes a peer user id, DELETE a message id
        .route(
            "/api/messages/{id}",
            get(handlers::messages::conversation).delete(handlers::messages::delete_message),
        )
        .route(
            "/api/messages/read/{user_id}",
            put(handlers::messages::mark_read),
        )
        .route_layer(middleware::from_fn_with_state(state, mw_require_auth))
}
