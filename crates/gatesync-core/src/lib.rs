pub mod bus;
pub mod id;
pub mod protocol;

pub use bus::{Dispatcher, Subscription};
pub use protocol::{
    decode_frame, ChatTurn, DecodeError, EventKind, InboundEvent, OutboundRequest, RawMessage,
    Role,
};
