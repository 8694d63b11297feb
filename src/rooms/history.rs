//! Cursor pagination over a room's history.
//!
//! Pages run newest first. A cursor is the smallest id a client has already
//! seen; the next page holds ids strictly below it. Ids only ever grow, so
//! messages inserted while a client pages backwards land above every cursor it
//! will send and can neither shift nor duplicate rows it has yet to read.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    debug_handler,
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;

use crate::{appresult::ChatError, auth::AuthUser, config::Config, AppResult};

/// One history row with the sender's display details, when the sender still exists.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i64,
    pub sender_id: Option<i64>,
    pub sender_display_name: Option<String>,
    pub sender_avatar_url: Option<String>,
    pub body: String,
    pub is_deleted: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub messages: Vec<T>,
    pub has_more: bool,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Up to `limit` messages of `room_id` with id below `cursor`, highest id first.
    async fn select_before(
        &self,
        room_id: i64,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageView>, ChatError>;
}

#[async_trait]
impl HistoryStore for SqlitePool {
    async fn select_before(
        &self,
        room_id: i64,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageView>, ChatError> {
        Ok(sqlx::query_as(
            "SELECT m.id, u.id AS sender_id, u.username AS sender_display_name, \
                    u.profile_image AS sender_avatar_url, m.body, m.is_deleted, m.created_at \
             FROM messages m LEFT JOIN users u ON u.id = m.sender_id \
             WHERE m.room_id = ? AND (? IS NULL OR m.id < ?) \
             ORDER BY m.id DESC LIMIT ?",
        )
        .bind(room_id)
        .bind(cursor)
        .bind(cursor)
        .bind(i64::from(limit))
        .fetch_all(self)
        .await?)
    }
}

/// Most recent `page_size` messages of `room_id` before `cursor`.
///
/// Asks the store for one row more than requested; getting it back is what
/// sets `has_more`. An unknown room reads as an empty page.
pub async fn fetch_page<S>(
    store: &S,
    room_id: i64,
    cursor: Option<i64>,
    page_size: u32,
) -> Result<Page<MessageView>, ChatError>
where
    S: HistoryStore + ?Sized,
{
    if page_size == 0 {
        return Err(ChatError::BadRequest("page size must be at least 1".into()));
    }

    let rows = store
        .select_before(room_id, cursor, page_size.saturating_add(1))
        .await?;
    check_order(&rows, cursor)?;
    Ok(into_page(rows, page_size as usize))
}

// Strictly descending, all below the cursor. Anything else is the store's fault.
fn check_order(rows: &[MessageView], cursor: Option<i64>) -> Result<(), ChatError> {
    if let (Some(cursor), Some(first)) = (cursor, rows.first()) {
        if first.id >= cursor {
            tracing::error!(cursor, id = first.id, "store returned a row at or above the cursor");
            return Err(ChatError::StoreInvariant(format!(
                "id {} not below cursor {cursor}",
                first.id
            )));
        }
    }
    if let Some(pair) = rows.windows(2).find(|w| w[0].id <= w[1].id) {
        tracing::error!(a = pair[0].id, b = pair[1].id, "store returned ids out of order");
        return Err(ChatError::StoreInvariant(format!(
            "ids {} and {} are not strictly descending",
            pair[0].id, pair[1].id
        )));
    }
    Ok(())
}

pub fn into_page<T>(mut rows: Vec<T>, page_size: usize) -> Page<T> {
    let has_more = rows.len() > page_size;
    rows.truncate(page_size);
    Page { messages: rows, has_more }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    cursor: Option<i64>,
    size: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    Path(room_id): Path<i64>,
    Query(HistoryQuery { cursor, size }): Query<HistoryQuery>,
    State(db_pool): State<SqlitePool>,
    State(config): State<Arc<Config>>,
    AuthUser(principal): AuthUser,
) -> AppResult<Json<Page<MessageView>>> {
    let page_size = size.unwrap_or(config.default_page_size).min(config.max_page_size);
    let page = fetch_page(&db_pool, room_id, cursor, page_size).await?;

    tracing::debug!(
        user_id = principal.user_id,
        room_id,
        ?cursor,
        returned = page.messages.len(),
        has_more = page.has_more,
        "history page"
    );
    Ok(Json(page))
}
