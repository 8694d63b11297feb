//! Publish/subscribe fabric behind the relay.
//!
//! The gateway only needs two things from a broker: publish a payload under a
//! routing key, and a stream of payloads for a routing key. Delivery is
//! at-least-once at best; nothing here retries.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use redis::{aio::ConnectionManager, AsyncCommands};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::appresult::ChatError;

pub type PayloadStream = BoxStream<'static, String>;

pub type SharedBroker = Arc<dyn Broker>;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: String) -> Result<(), ChatError>;

    async fn subscribe(&self, routing_key: &str) -> Result<PayloadStream, ChatError>;
}

type Channels = Mutex<HashMap<String, broadcast::Sender<String>>>;

fn lock(channels: &Channels) -> MutexGuard<'_, HashMap<String, broadcast::Sender<String>>> {
    channels.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process fan-out, one broadcast channel per routing key. A key lives
/// only while it has at least one subscriber.
pub struct LocalBroker {
    capacity: usize,
    channels: Arc<Channels>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::default(),
        }
    }

    pub fn subscriber_count(&self, routing_key: &str) -> usize {
        lock(&self.channels).get(routing_key).map_or(0, |tx| tx.receiver_count())
    }

    /// Routing keys that currently have a channel.
    pub fn key_count(&self) -> usize {
        lock(&self.channels).len()
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// One receiver on a local channel. Dropping the last one for a key removes
/// the key.
struct LocalSubscription {
    routing_key: String,
    rx: Option<broadcast::Receiver<String>>,
    channels: Arc<Channels>,
}

impl LocalSubscription {
    async fn next_payload(&mut self) -> Option<String> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        routing_key = %self.routing_key,
                        skipped,
                        "subscriber lagged, payloads dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        drop(self.rx.take());
        let mut channels = lock(&self.channels);
        if channels.get(&self.routing_key).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(&self.routing_key);
        }
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, routing_key: &str, payload: String) -> Result<(), ChatError> {
        if let Some(tx) = lock(&self.channels).get(routing_key) {
            // no receivers left is not an error; the last one prunes the key
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, routing_key: &str) -> Result<PayloadStream, ChatError> {
        let rx = lock(&self.channels)
            .entry(routing_key.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let subscription = LocalSubscription {
            routing_key: routing_key.to_owned(),
            rx: Some(rx),
            channels: Arc::clone(&self.channels),
        };
        let stream = futures_util::stream::unfold(subscription, |mut subscription| async move {
            let payload = subscription.next_payload().await?;
            Some((payload, subscription))
        });
        Ok(stream.boxed())
    }
}

/// Redis PUBLISH / SUBSCRIBE, so several relay instances share one fabric.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    pub async fn from_url(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, routing_key: &str, payload: String) -> Result<(), ChatError> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(routing_key, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, routing_key: &str) -> Result<PayloadStream, ChatError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(routing_key).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(
                        channel = msg.get_channel_name(),
                        error = %e,
                        "undecodable broker payload"
                    );
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
