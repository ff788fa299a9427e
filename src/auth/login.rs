use axum::{
    Form, debug_handler,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;
use tracing::info;

use crate::{AppResult, AppState, error::ChatError, include_res, res, session, store::Store};

use super::CredentialsForm;

#[debug_handler]
pub(crate) async fn login_page(session: Session) -> AppResult<Response> {
    if session::current_identity(&session).await?.is_some() {
        return Ok(Redirect::to("/chat").into_response());
    }

    let flash = session::take_flash(&session).await?;
    Ok(res::form_page(include_res!(str, "/pages/login.html"), flash.as_deref()).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn login(
    State(store): State<Store>,
    session: Session,
    Form(CredentialsForm { username, password }): Form<CredentialsForm>,
) -> AppResult<Response> {
    match super::authenticate(&store, &username, &password).await {
        Ok(identity) => {
            session::sign_in(&session, &identity).await?;
            info!("welcome @{}#{}", identity.username, identity.id);
            Ok(Redirect::to("/chat").into_response())
        }
        Err(ChatError::InvalidCredentials) => Ok(
            res::form_page(include_res!(str, "/pages/login.html"), Some("Invalid username or password"))
                .into_response()
        ),
        Err(err) => Err(err.into()),
    }
}
