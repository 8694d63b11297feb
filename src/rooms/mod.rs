pub mod history;
pub mod msg;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::AppState;

pub use history::{fetch_page, HistoryStore, MessageView, Page};
pub use msg::Message;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{room_id}/messages", get(history::messages))
        .route("/{room_id}/messages/{message_id}", delete(msg::delete_message))
}
