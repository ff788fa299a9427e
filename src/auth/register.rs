use axum::{
    Form, debug_handler,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;

use crate::{AppResult, AppState, error::ChatError, include_res, res, session, store::Store};

use super::CredentialsForm;

#[debug_handler]
pub(crate) async fn register_page(session: Session) -> AppResult<Response> {
    let flash = session::take_flash(&session).await?;
    Ok(res::form_page(include_res!(str, "/pages/register.html"), flash.as_deref()).into_response())
}

#[debug_handler(state = AppState)]
pub(crate) async fn register(
    State(store): State<Store>,
    session: Session,
    Form(CredentialsForm { username, password }): Form<CredentialsForm>,
) -> AppResult<Redirect> {
    match super::register(&store, &username, &password).await {
        Ok(_) => {
            session::flash(&session, "Registration successful! Please log in.").await?;
            Ok(Redirect::to("/login"))
        }
        Err(ChatError::DuplicateHandle(_)) => {
            session::flash(&session, "User already exists").await?;
            Ok(Redirect::to("/register"))
        }
        Err(ChatError::InvalidHandle) => {
            session::flash(&session, "Username and password are required").await?;
            Ok(Redirect::to("/register"))
        }
        Err(err) => Err(err.into()),
    }
}
