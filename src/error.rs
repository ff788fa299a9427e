use thiserror::Error;

use crate::store::UserId;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not authenticated")]
    AuthRequired,

    #[error("connection is already bound to an identity")]
    AlreadyBound,

    #[error("handle `{0}` is already taken")]
    DuplicateHandle(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("username and password are required")]
    InvalidHandle,

    #[error("no user with id {0}")]
    UnknownReceiver(UserId),

    #[error("private message addressed to its own sender")]
    SelfSend,

    #[error("message content is empty")]
    EmptyContent,

    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Credential(String),
}

impl ChatError {
    /// Errors the live channel swallows instead of reporting to the peer.
    pub fn is_silent(&self) -> bool {
        use ChatError::*;
        matches!(
            self,
            AuthRequired | AlreadyBound | UnknownReceiver(_) | SelfSend | EmptyContent
        )
    }
}
