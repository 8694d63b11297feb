//! Per-connection authentication gate.
//!
//! A connection starts unauthenticated, binds a principal on its first valid
//! `connect` frame and keeps it until the transport goes away. The credential
//! is not re-checked per frame; a compromised token stays usable on an open
//! connection until that connection is dropped.

use std::{fmt, str::FromStr};

use uuid::Uuid;

use crate::{appresult::ChatError, auth::{Principal, Tokens}};

use super::frame::{ClientFrame, Destination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Owned by one connection; only [`Gateway`] moves it between phases.
#[derive(Debug)]
pub struct ConnectionState {
    id: ConnectionId,
    phase: Phase,
    principal: Option<Principal>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            id: ConnectionId(Uuid::now_v7()),
            phase: Phase::Unauthenticated,
            principal: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    fn bind(&mut self, principal: Principal) {
        debug_assert!(self.principal.is_none());
        self.principal = Some(principal);
        self.phase = Phase::Authenticated;
    }

    fn close(&mut self) {
        self.phase = Phase::Closed;
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// What to do with a bad `connect` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFailurePolicy {
    /// Reject the frame, keep the connection for another attempt.
    #[default]
    Retry,
    /// Reject the frame and close the connection.
    Close,
}

impl FromStr for AuthFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retry" => Ok(AuthFailurePolicy::Retry),
            "close" => Ok(AuthFailurePolicy::Close),
            other => Err(format!("unknown auth failure policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    Subscribe(Destination),
    Unsubscribe(Destination),
    Send { destination: Destination, body: String },
}

/// A frame cleared for the broker, tagged with the connection's principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub principal: Principal,
    pub action: Action,
}

#[derive(Debug)]
pub enum Decision {
    Forward(Authorized),
    Reject(ChatError),
    Terminate,
}

#[derive(Clone)]
pub struct Gateway {
    tokens: Tokens,
    policy: AuthFailurePolicy,
}

impl Gateway {
    pub fn new(tokens: Tokens, policy: AuthFailurePolicy) -> Self {
        Self { tokens, policy }
    }

    pub fn intercept(&self, state: &mut ConnectionState, frame: ClientFrame) -> Decision {
        if state.is_closed() {
            return Decision::Terminate;
        }

        let Some(principal) = state.principal.clone() else {
            return match frame {
                ClientFrame::Connect { token } => self.authenticate(state, &token),
                ClientFrame::Disconnect => disconnect(state),
                _ => Decision::Reject(ChatError::Authorization(
                    "connection is not authenticated".into(),
                )),
            };
        };

        let action = match frame {
            ClientFrame::Connect { .. } => Err(ChatError::Authorization(
                "connection is already authenticated".into(),
            )),
            ClientFrame::Subscribe { destination } => {
                parse_destination(&destination).map(Action::Subscribe)
            }
            ClientFrame::Unsubscribe { destination } => {
                parse_destination(&destination).map(Action::Unsubscribe)
            }
            ClientFrame::Send { destination, body } => parse_destination(&destination)
                .map(|destination| Action::Send { destination, body }),
            ClientFrame::Disconnect => return disconnect(state),
        };

        match action {
            Ok(action) => Decision::Forward(Authorized { principal, action }),
            Err(err) => Decision::Reject(err),
        }
    }

    pub fn on_transport_closed(&self, state: &mut ConnectionState) {
        state.close();
    }

    fn authenticate(&self, state: &mut ConnectionState, token: &str) -> Decision {
        match self.tokens.verify(token) {
            Ok(principal) => {
                tracing::info!(
                    connection = %state.id,
                    user_id = principal.user_id,
                    "relay connection authenticated"
                );
                state.bind(principal.clone());
                Decision::Forward(Authorized { principal, action: Action::Connect })
            }
            Err(err) => {
                tracing::info!(connection = %state.id, error = %err, "relay authentication failed");
                if self.policy == AuthFailurePolicy::Close {
                    state.close();
                }
                Decision::Reject(ChatError::Authentication(err))
            }
        }
    }
}

fn disconnect(state: &mut ConnectionState) -> Decision {
    state.close();
    Decision::Terminate
}

fn parse_destination(raw: &str) -> Result<Destination, ChatError> {
    Destination::parse(raw)
        .ok_or_else(|| ChatError::BadRequest(format!("unknown destination {raw:?}")))
}
