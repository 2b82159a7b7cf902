//! Reconnecting WebSocket transport for the gateway protocol.

pub mod connector;
pub mod error;
pub mod transport;

pub use connector::{Connection, Connector, PeerEnds, WsConnector};
pub use error::TransportError;
pub use transport::{
    ConnectionState, Transport, TransportConfig, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_RECONNECT_DELAY,
};
