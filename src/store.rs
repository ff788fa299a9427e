//! Durable users and messages.
//!
//! Every append goes through a single writer lock that also hands out the
//! message timestamps, so row id order, timestamp order and commit order are
//! the same thing for both the room and every conversation.

use std::{str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ChatError, ChatResult};

pub type UserId = i64;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS user (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS message (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id INTEGER NOT NULL REFERENCES user(id),
        receiver_id INTEGER REFERENCES user(id),
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS private_message (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender_id INTEGER NOT NULL REFERENCES user(id),
        receiver_id INTEGER NOT NULL REFERENCES user(id),
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        is_read BOOLEAN NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS message_room ON message (receiver_id, id)",
    "CREATE INDEX IF NOT EXISTS private_message_pair ON private_message (sender_id, receiver_id, id)",
];

const ROOM_SELECT: &str = "SELECT m.id, m.sender_id, u.username AS sender, m.receiver_id, m.content, m.timestamp \
    FROM message m JOIN user u ON u.id = m.sender_id";

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

/// A row of the `message` table. Room messages have no `receiver_id`;
/// addressed ones name their receiver and are left out of the room history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: UserId,
    pub sender: String,
    pub receiver_id: Option<UserId>,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
}

/// Hands out non-decreasing timestamps even if the wall clock steps back.
struct Clock {
    last: OffsetDateTime,
}

impl Clock {
    fn tick(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        if now > self.last {
            self.last = now;
        }
        self.last
    }
}

#[derive(Clone)]
pub struct Store {
    db_pool: SqlitePool,
    writer: Arc<Mutex<Clock>>,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> ChatResult<Store> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        Store::with_pool(db_pool).await
    }

    /// A private in-memory database. The pool holds exactly one connection
    /// that never expires, otherwise the data would vanish with it.
    pub async fn in_memory() -> ChatResult<Store> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Store::with_pool(db_pool).await
    }

    async fn with_pool(db_pool: SqlitePool) -> ChatResult<Store> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&db_pool).await?;
        }
        info!("database schema ready");

        let last = Store::newest_timestamp(&db_pool).await?;
        Ok(Store {
            db_pool,
            writer: Arc::new(Mutex::new(Clock { last })),
        })
    }

    /// Newest timestamp already on disk, so a restarted clock never hands out
    /// anything older. Ids and timestamps advance together, so the highest id
    /// of each table carries its largest timestamp.
    async fn newest_timestamp(db_pool: &SqlitePool) -> ChatResult<OffsetDateTime> {
        let mut newest = OffsetDateTime::UNIX_EPOCH;
        for table in ["message", "private_message"] {
            let last: Option<OffsetDateTime> =
                sqlx::query_scalar(&format!("SELECT timestamp FROM {table} ORDER BY id DESC LIMIT 1"))
                    .fetch_optional(db_pool)
                    .await?;
            if let Some(last) = last {
                newest = newest.max(last);
            }
        }

        Ok(newest)
    }

    pub async fn create_user(&self, handle: &str, credential_hash: &str) -> ChatResult<UserId> {
        let result = sqlx::query("INSERT INTO user (username, password_hash) VALUES (?, ?)")
            .bind(handle)
            .bind(credential_hash)
            .execute(&self.db_pool)
            .await;

        match result {
            Ok(done) => {
                let id = done.last_insert_rowid();
                info!("created user @{handle}#{id}");
                Ok(id)
            }
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(ChatError::DuplicateHandle(handle.to_owned()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_user(&self, handle: &str) -> ChatResult<Option<User>> {
        Ok(
            sqlx::query_as("SELECT id, username, password_hash FROM user WHERE username = ?")
                .bind(handle)
                .fetch_optional(&self.db_pool)
                .await?,
        )
    }

    pub async fn find_user_by_id(&self, id: UserId) -> ChatResult<Option<UserSummary>> {
        Ok(
            sqlx::query_as("SELECT id, username FROM user WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?,
        )
    }

    pub async fn list_users(&self) -> ChatResult<Vec<UserSummary>> {
        Ok(
            sqlx::query_as("SELECT id, username FROM user ORDER BY id")
                .fetch_all(&self.db_pool)
                .await?,
        )
    }

    pub async fn append_room_message(&self, sender_id: UserId, content: &str) -> ChatResult<Message> {
        self.append_message(sender_id, None, content).await
    }

    /// A `message` row with a receiver set. It stays out of the room listing.
    pub async fn append_addressed_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> ChatResult<Message> {
        self.append_message(sender_id, Some(receiver_id), content).await
    }

    async fn append_message(&self, sender_id: UserId, receiver_id: Option<UserId>, content: &str) -> ChatResult<Message> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let mut clock = self.writer.lock().await;
        let sender: String = sqlx::query_scalar("SELECT username FROM user WHERE id = ?")
            .bind(sender_id)
            .fetch_one(&self.db_pool)
            .await?;
        if let Some(receiver_id) = receiver_id {
            if self.find_user_by_id(receiver_id).await?.is_none() {
                return Err(ChatError::UnknownReceiver(receiver_id));
            }
        }

        let timestamp = clock.tick();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO message (sender_id, receiver_id, content, timestamp) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .bind(timestamp)
        .fetch_one(&self.db_pool)
        .await?;
        debug!("stored message {id} from #{sender_id} to {receiver_id:?}");

        Ok(Message {
            id,
            sender_id,
            sender,
            receiver_id,
            content: content.to_owned(),
            timestamp,
        })
    }

    pub async fn append_private_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> ChatResult<PrivateMessage> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyContent);
        }

        let mut clock = self.writer.lock().await;
        if self.find_user_by_id(receiver_id).await?.is_none() {
            return Err(ChatError::UnknownReceiver(receiver_id));
        }

        let timestamp = clock.tick();
        let id = sqlx::query(
            "INSERT INTO private_message (sender_id, receiver_id, content, timestamp, is_read) VALUES (?, ?, ?, ?, 0)",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .bind(timestamp)
        .execute(&self.db_pool)
        .await?
        .last_insert_rowid();
        debug!("stored private message {id} #{sender_id} -> #{receiver_id}");

        Ok(PrivateMessage {
            id,
            sender_id,
            receiver_id,
            content: content.to_owned(),
            timestamp,
            is_read: false,
        })
    }

    pub async fn list_room_messages(&self) -> ChatResult<Vec<Message>> {
        Ok(
            sqlx::query_as(&format!("{ROOM_SELECT} WHERE m.receiver_id IS NULL ORDER BY m.id"))
                .fetch_all(&self.db_pool)
                .await?,
        )
    }

    /// Both directions of the conversation between `a` and `b`, oldest first.
    pub async fn list_conversation(&self, a: UserId, b: UserId) -> ChatResult<Vec<PrivateMessage>> {
        Ok(
            sqlx::query_as(
                "SELECT id, sender_id, receiver_id, content, timestamp, is_read FROM private_message \
                 WHERE (sender_id = ? AND receiver_id = ?) OR (sender_id = ? AND receiver_id = ?) \
                 ORDER BY id",
            )
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .fetch_all(&self.db_pool)
            .await?,
        )
    }
}
