//! Service configuration, read from the environment (and `.env` when present).

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context};

use crate::relay::AuthFailurePolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    /// Redis backs both the broker and the credential store when set.
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub default_page_size: u32,
    pub max_page_size: u32,
    pub auth_failure_policy: AuthFailurePolicy,
    /// Frames queued per connection before the writer applies backpressure.
    pub outbound_buffer: usize,
    pub max_subscriptions: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or(anyhow!("JWT_SECRET must be set"))?;

        let config = Config {
            listen_addr: parse_or(&lookup, "LISTEN_ADDR", "0.0.0.0:8080".parse()?)?,
            database_url: lookup("DATABASE_URL")
                .unwrap_or("sqlite:roomrelay.db?mode=rwc".to_owned()),
            redis_url: lookup("REDIS_URL").filter(|s| !s.is_empty()),
            jwt_secret,
            jwt_issuer: lookup("JWT_ISSUER").unwrap_or("roomrelay".to_owned()),
            access_token_ttl: Duration::from_secs(parse_or(
                &lookup,
                "ACCESS_TOKEN_TTL_SECS",
                30 * 60,
            )?),
            refresh_token_ttl: Duration::from_secs(parse_or(
                &lookup,
                "REFRESH_TOKEN_TTL_SECS",
                14 * 24 * 60 * 60,
            )?),
            default_page_size: parse_or(&lookup, "DEFAULT_PAGE_SIZE", 20)?,
            max_page_size: parse_or(&lookup, "MAX_PAGE_SIZE", 100)?,
            auth_failure_policy: parse_or(
                &lookup,
                "AUTH_FAILURE_POLICY",
                AuthFailurePolicy::Retry,
            )?,
            outbound_buffer: parse_or(&lookup, "RELAY_OUTBOUND_BUFFER", 256)?,
            max_subscriptions: parse_or(&lookup, "RELAY_MAX_SUBSCRIPTIONS", 64)?,
        };

        if config.default_page_size == 0 || config.max_page_size == 0 {
            bail!("page sizes must be at least 1");
        }
        if config.default_page_size > config.max_page_size {
            bail!("DEFAULT_PAGE_SIZE exceeds MAX_PAGE_SIZE");
        }
        if config.outbound_buffer == 0 {
            bail!("RELAY_OUTBOUND_BUFFER must be at least 1");
        }
        if config.max_subscriptions == 0 {
            bail!("RELAY_MAX_SUBSCRIPTIONS must be at least 1");
        }

        Ok(config)
    }

    /// Settings for tests and local tinkering; everything in-process.
    pub fn local(jwt_secret: &str) -> Config {
        Config {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            database_url: "sqlite::memory:".to_owned(),
            redis_url: None,
            jwt_secret: jwt_secret.to_owned(),
            jwt_issuer: "roomrelay".to_owned(),
            access_token_ttl: Duration::from_secs(30 * 60),
            refresh_token_ttl: Duration::from_secs(14 * 24 * 60 * 60),
            default_page_size: 20,
            max_page_size: 100,
            auth_failure_policy: AuthFailurePolicy::Retry,
            outbound_buffer: 256,
            max_subscriptions: 64,
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("invalid {key}={raw:?}")),
        None => Ok(default),
    }
}
