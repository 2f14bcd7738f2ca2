// src/realtime/mod.rs

pub mod dispatcher;
pub mod message;

pub use dispatcher::Dispatcher;
pub use message::{ClientMessage, WsMessage};
