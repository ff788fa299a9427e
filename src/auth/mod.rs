mod login;
mod logout;
mod password;
mod register;

use axum::{Router, routing::get};
use serde::Deserialize;
use tracing::info;

use crate::{
    AppState,
    error::{ChatError, ChatResult},
    registry::Identity,
    store::{Store, UserId},
};

pub use password::{hash_password, verify_password};

#[derive(Deserialize)]
pub(crate) struct CredentialsForm {
    pub(crate) username: String,
    pub(crate) password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login::login_page).post(login::login))
        .route("/register", get(register::register_page).post(register::register))
        .route("/logout", get(logout::logout))
}

pub async fn register(store: &Store, handle: &str, password: &str) -> ChatResult<UserId> {
    let handle = handle.trim();
    if handle.is_empty() || password.is_empty() {
        return Err(ChatError::InvalidHandle);
    }

    let password = password.to_owned();
    let hash = blocking(move || hash_password(&password)).await??;
    store.create_user(handle, &hash).await
}

pub async fn authenticate(store: &Store, handle: &str, password: &str) -> ChatResult<Identity> {
    let Some(user) = store.find_user(handle.trim()).await? else {
        return Err(ChatError::InvalidCredentials);
    };
    let password = password.to_owned();
    let hash = user.password_hash.clone();
    if !blocking(move || verify_password(&password, &hash)).await? {
        info!("bad password for @{}", user.username);
        return Err(ChatError::InvalidCredentials);
    }

    Ok(Identity { id: user.id, username: user.username })
}

/// Runs CPU-bound password work on the blocking pool.
async fn blocking<T, F>(work: F) -> ChatResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ChatError::Credential(err.to_string()))
}
