use std::{collections::HashMap, time::Duration};

use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{appresult::ChatError, rooms::msg};

use super::{
    broker::{PayloadStream, SharedBroker},
    frame::{ClientFrame, Destination, ServerFrame},
    gateway::{Action, Authorized, ConnectionId, ConnectionState, Decision, Gateway},
};

/// Everything a relay connection needs, shared by all connections.
#[derive(Clone)]
pub struct Relay {
    gateway: Gateway,
    broker: SharedBroker,
    db_pool: SqlitePool,
    limits: RelayLimits,
}

#[derive(Debug, Clone, Copy)]
pub struct RelayLimits {
    /// Frames queued per connection before the writer applies backpressure.
    pub outbound_buffer: usize,
    /// Distinct destinations one connection may subscribe to at once.
    pub max_subscriptions: usize,
}

#[debug_handler(state = crate::AppState)]
pub async fn relay_ws(
    State(relay): State<Relay>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay.serve(socket))
}

impl Relay {
    pub fn new(
        gateway: Gateway,
        broker: SharedBroker,
        db_pool: SqlitePool,
        limits: RelayLimits,
    ) -> Self {
        let limits = RelayLimits {
            outbound_buffer: limits.outbound_buffer.max(1),
            max_subscriptions: limits.max_subscriptions.max(1),
        };
        Self { gateway, broker, db_pool, limits }
    }

    /// Runs one connection to completion. Inbound frames are handled strictly
    /// in arrival order; outbound frames go through a single writer task.
    pub async fn serve(self, socket: WebSocket) {
        let mut state = ConnectionState::new();
        let connection = state.id();
        tracing::info!(%connection, "relay connection opened");

        let (mut sender, mut receiver) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.limits.outbound_buffer);

        let mut writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if sender.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sender.close().await;
        });

        let mut subscriptions = Subscriptions::default();

        while let Some(Ok(msg)) = receiver.next().await {
            let parsed = match msg {
                WsMessage::Text(text) => serde_json::from_str::<ClientFrame>(text.as_str()),
                WsMessage::Binary(bytes) => serde_json::from_slice::<ClientFrame>(&bytes),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            };
            let frame = match parsed {
                Ok(frame) => frame,
                Err(e) => {
                    let err = ChatError::BadRequest(format!("malformed frame: {e}"));
                    reply_error(&out_tx, &err).await;
                    continue;
                }
            };

            match self.gateway.intercept(&mut state, frame) {
                Decision::Forward(authorized) => {
                    let outcome = self
                        .dispatch(connection, authorized, &mut subscriptions, &out_tx)
                        .await;
                    if let Err(e) = outcome {
                        match e.downcast_ref::<ChatError>() {
                            Some(err) => reply_error(&out_tx, err).await,
                            None => {
                                tracing::error!(%connection, error = ?e, "relay dispatch failed");
                                reply_error(&out_tx, &ChatError::Internal).await;
                            }
                        }
                    }
                }
                Decision::Reject(err) => {
                    reply_error(&out_tx, &err).await;
                    if state.is_closed() {
                        break;
                    }
                }
                Decision::Terminate => break,
            }
        }

        self.gateway.on_transport_closed(&mut state);
        drop(subscriptions);
        drop(out_tx);
        // give queued replies a moment to flush before dropping the socket
        if tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
            writer.abort();
        }
        tracing::info!(
            %connection,
            user_id = state.principal().map(|p| p.user_id),
            "relay connection closed"
        );
    }

    async fn dispatch(
        &self,
        connection: ConnectionId,
        Authorized { principal, action }: Authorized,
        subscriptions: &mut Subscriptions,
        out_tx: &mpsc::Sender<String>,
    ) -> anyhow::Result<()> {
        match action {
            Action::Connect => {
                reply(out_tx, &ServerFrame::Connected { user_id: principal.user_id }).await;
            }
            Action::Subscribe(destination) => {
                let routing_key = destination.routing_key();
                if !subscriptions.contains(&routing_key) {
                    if subscriptions.len() >= self.limits.max_subscriptions {
                        return Err(ChatError::BadRequest(format!(
                            "subscription limit of {} reached",
                            self.limits.max_subscriptions
                        ))
                        .into());
                    }
                    let stream = self.broker.subscribe(&routing_key).await?;
                    tracing::debug!(%connection, %routing_key, "subscribed");
                    subscriptions.insert(routing_key, stream, out_tx.clone());
                }
            }
            Action::Unsubscribe(destination) => {
                subscriptions.remove(&destination.routing_key());
            }
            Action::Send { destination, body } => {
                let (message_id, sent_at) = match destination {
                    Destination::Room(room_id) => {
                        let sender = Some(principal.user_id);
                        let stored = msg::append(&self.db_pool, room_id, sender, &body).await?;
                        (Some(stored.id), stored.created_at)
                    }
                    Destination::Topic(_) => (None, OffsetDateTime::now_utc()),
                };

                let routing_key = destination.routing_key();
                let payload = ServerFrame::Message {
                    destination: routing_key.clone(),
                    sender_id: principal.user_id,
                    message_id,
                    body,
                    sent_at,
                }
                .to_text()?;

                if let Err(err) = self.broker.publish(&routing_key, payload).await {
                    tracing::warn!(%connection, %routing_key, error = %err, "publish failed");
                    let Some(message_id) = message_id else {
                        return Err(err.into());
                    };
                    // already in history; a resend would store it twice
                    let frame = ServerFrame::Error {
                        reason: format!("message {message_id} was stored but not relayed: {err}"),
                        retryable: false,
                        message_id: Some(message_id),
                    };
                    reply(out_tx, &frame).await;
                }
            }
        }
        Ok(())
    }
}

async fn reply(out_tx: &mpsc::Sender<String>, frame: &ServerFrame) {
    match frame.to_text() {
        // a closed writer means the client is gone; nothing left to tell it
        Ok(text) => {
            let _ = out_tx.send(text).await;
        }
        Err(e) => tracing::error!(error = %e, "server frame did not serialize"),
    }
}

async fn reply_error(out_tx: &mpsc::Sender<String>, err: &ChatError) {
    let frame = ServerFrame::Error {
        reason: err.to_string(),
        retryable: err.is_retryable(),
        message_id: None,
    };
    reply(out_tx, &frame).await;
}

/// Broker subscriptions held by one connection. Dropping it cancels them all.
#[derive(Default)]
struct Subscriptions {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl Subscriptions {
    fn contains(&self, routing_key: &str) -> bool {
        self.tasks.contains_key(routing_key)
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn insert(
        &mut self,
        routing_key: String,
        mut stream: PayloadStream,
        out_tx: mpsc::Sender<String>,
    ) {
        let task = tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                if out_tx.send(payload).await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.tasks.insert(routing_key, task) {
            previous.abort();
        }
    }

    fn remove(&mut self, routing_key: &str) {
        if let Some(task) = self.tasks.remove(routing_key) {
            task.abort();
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for task in self.tasks.values() {
            task.abort();
        }
    }
}
