use axum::{
    debug_handler,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{appresult::ChatError, AppResult};

use super::{session::{self, REFRESH_TOKEN_HEADER}, SharedCredentials, Tokens};

fn refresh_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(REFRESH_TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn logout(
    State(credentials): State<SharedCredentials>,
    headers: HeaderMap,
) -> AppResult<StatusCode> {
    session::revoke(credentials.as_ref(), refresh_header(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn refresh(
    State(tokens): State<Tokens>,
    State(credentials): State<SharedCredentials>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let refresh_token = refresh_header(&headers)
        .ok_or(ChatError::BadRequest(format!("missing {REFRESH_TOKEN_HEADER} header")))?;
    let access_token = session::renew(&tokens, credentials.as_ref(), refresh_token).await?;
    Ok(Json(json!({ "access_token": access_token })))
}
