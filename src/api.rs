//! Read-only history queries a client makes before opening the live channel.

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::get,
};
use tower_sessions::Session;

use crate::{
    AppResult, AppState, session,
    store::{Message, PrivateMessage, Store, UserId, UserSummary},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(users))
        .route("/messages", get(room_messages))
        .route("/private-messages/{user_id}", get(private_messages))
}

#[debug_handler(state = AppState)]
async fn users(State(store): State<Store>, session: Session) -> AppResult<Json<Vec<UserSummary>>> {
    session::require_identity(&session).await?;
    Ok(Json(store.list_users().await?))
}

#[debug_handler(state = AppState)]
async fn room_messages(State(store): State<Store>, session: Session) -> AppResult<Json<Vec<Message>>> {
    session::require_identity(&session).await?;
    Ok(Json(store.list_room_messages().await?))
}

#[debug_handler(state = AppState)]
async fn private_messages(
    State(store): State<Store>,
    session: Session,
    Path(user_id): Path<UserId>,
) -> AppResult<Json<Vec<PrivateMessage>>> {
    let me = session::require_identity(&session).await?;
    Ok(Json(store.list_conversation(me.id, user_id).await?))
}
