//! Streaming session with the remote voice model.

pub mod bridge;
pub mod protocol;
pub mod state;
pub mod transport;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use bridge::{SessionBridge, SessionConfig, SessionEvent, SessionHandle};
pub use protocol::{ClientMessage, InboundAudio, InboundMessage};
pub use state::{SessionState, StateCell};
pub use transport::{ChannelConnector, Connector, RemoteEnd, TransportLink};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
