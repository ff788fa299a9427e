use axum::{
    debug_handler,
    response::{Html, IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

use crate::{AppResult, include_res, res::escape_html, session};

#[debug_handler]
pub async fn index(session: Session) -> AppResult<Response> {
    if session::current_identity(&session).await?.is_some() {
        return Ok(Redirect::to("/chat").into_response());
    }

    Ok(Html(include_res!(str, "/pages/index.html")).into_response())
}

#[debug_handler]
pub async fn chat(session: Session) -> AppResult<Response> {
    let Some(identity) = session::current_identity(&session).await? else {
        return Ok(Redirect::to("/login").into_response());
    };

    Ok(
        Html(
            include_res!(str, "/pages/chat.html")
                .replace("{username}", &escape_html(&identity.username))
                .replace("{user_id}", &identity.id.to_string())
        ).into_response()
    )
}
