//! Refresh-credential storage.
//!
//! An entry exists for every refresh credential that may still renew an access
//! token. Logout deletes it; a missing key means the credential is dead.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::{sync::RwLock, time::Instant};

use crate::appresult::ChatError;

pub type SharedCredentials = Arc<dyn CredentialStore>;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, key: &str, user_id: i64, ttl: Duration) -> Result<(), ChatError>;

    async fn lookup(&self, key: &str) -> Result<Option<i64>, ChatError>;

    /// Idempotent: deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), ChatError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, (i64, Instant)>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn put(&self, key: &str, user_id: i64, ttl: Duration) -> Result<(), ChatError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_owned(), (user_id, now + ttl));
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<i64>, ChatError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(user_id, _)| *user_id))
    }

    async fn delete(&self, key: &str) -> Result<(), ChatError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCredentialStore {
    manager: ConnectionManager,
}

impl RedisCredentialStore {
    pub async fn from_url(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn key(key: &str) -> String {
        format!("refresh:{key}")
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn put(&self, key: &str, user_id: i64, ttl: Duration) -> Result<(), ChatError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(Self::key(key), user_id, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<i64>, ChatError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(Self::key(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), ChatError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(Self::key(key)).await?;
        Ok(())
    }
}
