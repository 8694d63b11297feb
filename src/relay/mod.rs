pub mod broker;
pub mod frame;
pub mod gateway;
mod ws;

pub use broker::{Broker, LocalBroker, PayloadStream, RedisBroker, SharedBroker};
pub use frame::{ClientFrame, Destination, ServerFrame};
pub use gateway::{Action, AuthFailurePolicy, Authorized, ConnectionState, Decision, Gateway, Phase};
pub use ws::{relay_ws, Relay, RelayLimits};
