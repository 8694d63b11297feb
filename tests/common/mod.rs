#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use roomrelay::{
    app,
    auth::{CredentialStore, MemoryCredentialStore, SharedCredentials},
    config::Config,
    db,
    relay::{Broker, LocalBroker, PayloadStream, SharedBroker},
    AppState, ChatError,
};
use sqlx::SqlitePool;
use tokio::net::TcpListener;

pub const SECRET: &str = "integration-secret";

pub async fn state_with_stores(
    config: Config,
    credentials: SharedCredentials,
    broker: SharedBroker,
) -> AppState {
    let db_pool = db::connect_in_memory().await.unwrap();
    AppState::new(config, db_pool, credentials, broker)
}

pub async fn state_with(config: Config) -> AppState {
    state_with_stores(
        config,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(LocalBroker::default()),
    )
    .await
}

pub async fn state() -> AppState {
    state_with(Config::local(SECRET)).await
}

/// Serves the full router on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn access_token(state: &AppState, user_id: i64) -> String {
    state.tokens.issue_access(user_id).unwrap()
}

/// Users live in the profile tables; messages reference them.
pub async fn seed_user(db_pool: &SqlitePool, user_id: i64) {
    sqlx::query("INSERT INTO users (id,username) VALUES (?,?)")
        .bind(user_id)
        .bind(format!("user{user_id}"))
        .execute(db_pool)
        .await
        .unwrap();
}

fn unavailable() -> ChatError {
    ChatError::StoreUnavailable(anyhow::anyhow!("connection refused"))
}

/// Broker whose publishes always fail. Subscriptions succeed and stay silent.
pub struct DownBroker;

#[async_trait]
impl Broker for DownBroker {
    async fn publish(&self, _routing_key: &str, _payload: String) -> Result<(), ChatError> {
        Err(unavailable())
    }

    async fn subscribe(&self, _routing_key: &str) -> Result<PayloadStream, ChatError> {
        Ok(futures_util::stream::pending().boxed())
    }
}

pub struct DownCredentials;

#[async_trait]
impl CredentialStore for DownCredentials {
    async fn put(&self, _key: &str, _user_id: i64, _ttl: Duration) -> Result<(), ChatError> {
        Err(unavailable())
    }

    async fn lookup(&self, _key: &str) -> Result<Option<i64>, ChatError> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &str) -> Result<(), ChatError> {
        Err(unavailable())
    }
}
