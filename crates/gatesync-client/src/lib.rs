//! Gateway client: wires the reconnecting transport, the event dispatcher
//! and the session and connection stores together.

pub mod client;
pub mod command;
pub mod render;

pub use client::{transport_config, GatewayClient};
pub use command::{CommandAction, CommandRegistry, Input};
pub use render::{render, Output};
