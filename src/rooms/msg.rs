use axum::{
    debug_handler,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{appresult::ChatError, auth::AuthUser, AppResult};

/// A stored chat message. Only `is_deleted` changes after insert.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: Option<i64>,
    pub body: String,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn append(
    db_pool: &SqlitePool,
    room_id: i64,
    sender_id: Option<i64>,
    body: &str,
) -> Result<Message, ChatError> {
    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages (room_id,sender_id,body,is_deleted,created_at) \
         VALUES (?,?,?,FALSE,?) \
         RETURNING id,room_id,sender_id,body,is_deleted,created_at",
    )
    .bind(room_id)
    .bind(sender_id)
    .bind(body)
    .bind(OffsetDateTime::now_utc())
    .fetch_one(db_pool)
    .await?;

    tracing::debug!(message_id = message.id, room_id, "message stored");
    Ok(message)
}

pub async fn find(db_pool: &SqlitePool, message_id: i64) -> Result<Option<Message>, ChatError> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id,room_id,sender_id,body,is_deleted,created_at FROM messages WHERE id=?",
    )
    .bind(message_id)
    .fetch_optional(db_pool)
    .await?;
    Ok(message)
}

/// Returns false when no such message exists.
pub async fn soft_delete(db_pool: &SqlitePool, message_id: i64) -> Result<bool, ChatError> {
    let result = sqlx::query("UPDATE messages SET is_deleted=TRUE WHERE id=?")
        .bind(message_id)
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Soft-deletes a message. Only its sender may do so; the row stays in history
/// with `isDeleted` set.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete_message(
    Path((room_id, message_id)): Path<(i64, i64)>,
    State(db_pool): State<SqlitePool>,
    AuthUser(principal): AuthUser,
) -> AppResult<StatusCode> {
    let message = find(&db_pool, message_id)
        .await?
        .filter(|m| m.room_id == room_id)
        .ok_or_else(|| ChatError::NotFound(format!("message {message_id} in room {room_id}")))?;

    if message.sender_id != Some(principal.user_id) {
        return Err(ChatError::Authorization("only the sender may delete a message".into()).into());
    }

    soft_delete(&db_pool, message_id).await?;
    tracing::info!(message_id, room_id, user_id = principal.user_id, "message deleted");
    Ok(StatusCode::NO_CONTENT)
}
