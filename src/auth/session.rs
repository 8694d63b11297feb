use serde::Serialize;
use uuid::Uuid;

use crate::appresult::ChatError;

use super::{CredentialStore, Tokens, VerifyError};

pub const REFRESH_TOKEN_HEADER: &str = "refresh-token";

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

fn new_refresh_credential() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Mints a token pair and records the refresh credential. Called by whatever
/// performs the password check at login.
pub async fn issue_session(
    tokens: &Tokens,
    store: &dyn CredentialStore,
    user_id: i64,
) -> anyhow::Result<TokenPair> {
    let refresh_token = new_refresh_credential();
    store.put(&refresh_token, user_id, tokens.refresh_ttl()).await?;
    let access_token = tokens.issue_access(user_id)?;

    tracing::info!(user_id, "session issued");
    Ok(TokenPair { access_token, refresh_token })
}

/// Deletes the refresh credential. Missing or blank input is a no-op, as is a
/// credential the store has never seen.
pub async fn revoke(
    store: &dyn CredentialStore,
    refresh_token: Option<&str>,
) -> Result<(), ChatError> {
    let Some(refresh_token) = refresh_token.filter(|t| !t.trim().is_empty()) else {
        return Ok(());
    };
    store.delete(refresh_token).await?;
    tracing::info!("refresh credential revoked");
    Ok(())
}

/// New access token for a live refresh credential.
pub async fn renew(
    tokens: &Tokens,
    store: &dyn CredentialStore,
    refresh_token: &str,
) -> anyhow::Result<String> {
    let Some(user_id) = store.lookup(refresh_token).await? else {
        // revoked and lapsed credentials look the same from here
        return Err(ChatError::Authentication(VerifyError::Expired).into());
    };
    tokens.issue_access(user_id)
}
