mod bearer;
mod credentials;
mod logout;
mod session;
mod token;

use axum::{routing::post, Router};

use crate::AppState;

pub use bearer::AuthUser;
pub use credentials::{
    CredentialStore, MemoryCredentialStore, RedisCredentialStore, SharedCredentials,
};
pub use session::{issue_session, renew, revoke, TokenPair, REFRESH_TOKEN_HEADER};
pub use token::{Principal, Tokens, VerifyError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout::logout))
        .route("/refresh", post(logout::refresh))
}
