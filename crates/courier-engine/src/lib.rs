//! # courier-engine
//!
//! The transport side of the Courier message core.
//!
//! - [`MessageEngine`]: the abstraction consumers talk to
//! - [`Engine`]: actor-backed implementation over any [`Connector`]
//! - [`WsConnector`] / [`loopback`]: WebSocket and in-process transports
//! - [`codec`]: the JSON wire format
//! - [`EngineContext`]: one shared engine per application, connected while
//!   anyone holds it

#![deny(unsafe_code)]

pub mod actor;
pub mod codec;
pub mod engine;
pub mod errors;
pub mod instance;
pub mod listeners;
pub mod loopback;
pub mod transport;
pub mod websocket;

pub use actor::Engine;
pub use engine::{MessageCallback, MessageEngine, StatusCallback};
pub use errors::{EngineError, TransportError, codes};
pub use instance::{
    EngineContext, EngineContextBuilder, EngineFactory, EngineLease, LifecycleEvent,
    LifecyclePolicy, RefCount,
};
pub use listeners::{Callback, Listeners};
pub use loopback::{LoopbackConnector, LoopbackServer, loopback};
pub use transport::{Connector, Link, LinkEvent};
pub use websocket::WsConnector;
