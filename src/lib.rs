pub mod appresult;
pub mod auth;
pub mod config;
pub mod db;
pub mod relay;
pub mod rooms;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use appresult::{AppError, AppResult, ChatError};

use auth::{MemoryCredentialStore, RedisCredentialStore, SharedCredentials, Tokens};
use config::Config;
use relay::{Gateway, LocalBroker, RedisBroker, Relay, RelayLimits, SharedBroker};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub tokens: Tokens,
    pub credentials: SharedCredentials,
    pub relay: Relay,
}

impl AppState {
    pub fn new(
        config: Config,
        db_pool: SqlitePool,
        credentials: SharedCredentials,
        broker: SharedBroker,
    ) -> AppState {
        let tokens = Tokens::from_config(&config);
        let gateway = Gateway::new(tokens.clone(), config.auth_failure_policy);
        let limits = RelayLimits {
            outbound_buffer: config.outbound_buffer,
            max_subscriptions: config.max_subscriptions,
        };
        let relay = Relay::new(gateway, broker, db_pool.clone(), limits);
        AppState {
            db_pool,
            config: Arc::new(config),
            tokens,
            credentials,
            relay,
        }
    }

    /// Connects the stores the config names; Redis when configured, in-process otherwise.
    pub async fn connect(config: Config) -> anyhow::Result<AppState> {
        let db_pool = db::connect(&config.database_url).await?;

        let (credentials, broker): (SharedCredentials, SharedBroker) = match &config.redis_url {
            Some(url) => {
                tracing::info!("using redis for credentials and relay fan-out");
                (
                    Arc::new(RedisCredentialStore::from_url(url).await?),
                    Arc::new(RedisBroker::from_url(url).await?),
                )
            }
            None => {
                tracing::warn!("REDIS_URL not set, relay fan-out is limited to this process");
                (Arc::new(MemoryCredentialStore::new()), Arc::new(LocalBroker::default()))
            }
        };

        Ok(AppState::new(config, db_pool, credentials, broker))
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .nest("/auth", auth::router())
        .nest("/rooms", rooms::router())
        .route("/relay", get(relay::relay_ws))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
