//! # courier-client
//!
//! Consumer-side glue over the shared engine.
//!
//! - [`MessageSubscription`]: mount one per top-level consumer; it owns a
//!   registry fed by the engine and releases everything on unmount
//! - [`bind_chat_state`]: routes chat traffic into a [`ChatStateSink`]
//! - [`ChatState`]: in-memory sink with per-agent conversations

#![deny(unsafe_code)]

pub mod chat_state;
pub mod subscription;

pub use chat_state::{ChatState, ChatStateBinding, ChatStateSink, ReceivedMessage, bind_chat_state};
pub use subscription::MessageSubscription;
