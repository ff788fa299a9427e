use tower_sessions::Session;

use crate::{AppResult, error::ChatError, registry::Identity, store::UserId};

pub const USER_ID: &str = "user_id";
pub const USERNAME: &str = "username";
pub const FLASH: &str = "flash";

pub async fn current_identity(session: &Session) -> AppResult<Option<Identity>> {
    let Some(id) = session.get::<UserId>(USER_ID).await? else {
        return Ok(None);
    };
    let Some(username) = session.get::<String>(USERNAME).await? else {
        return Ok(None);
    };

    Ok(Some(Identity { id, username }))
}

pub async fn require_identity(session: &Session) -> AppResult<Identity> {
    Ok(current_identity(session).await?.ok_or(ChatError::AuthRequired)?)
}

pub async fn sign_in(session: &Session, identity: &Identity) -> AppResult<()> {
    session.cycle_id().await?;
    session.insert(USER_ID, identity.id).await?;
    session.insert(USERNAME, &identity.username).await?;
    Ok(())
}

pub async fn flash(session: &Session, message: &str) -> AppResult<()> {
    session.insert(FLASH, message).await?;
    Ok(())
}

pub async fn take_flash(session: &Session) -> AppResult<Option<String>> {
    Ok(session.remove::<String>(FLASH).await?)
}
