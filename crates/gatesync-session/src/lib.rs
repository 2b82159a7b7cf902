//! Client-side session state: normalized messages, tool-call correlation and
//! connection status, each owned by a store that publishes over `watch`.

pub mod correlator;
pub mod history;
pub mod message;
pub mod projection;
pub mod status;
pub mod store;

pub use correlator::ToolCallCorrelator;
pub use history::{normalize_history, normalize_message};
pub use message::{Message, MessageMeta, ToolMeta, ToolStatus, ToolUpdate};
pub use status::{ConnectionStatus, ConnectionStatusStore};
pub use store::{ProcessingState, Session, SessionStore};
