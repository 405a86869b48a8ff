//! # courier-dispatch
//!
//! Routes envelopes to handlers.
//!
//! Each registration pairs a [`Predicate`] with a [`Handler`] and a priority.
//! [`HandlerRegistry::process`] runs every match in descending priority order
//! and keeps one handler's failure from reaching the others.

#![deny(unsafe_code)]

pub mod errors;
pub mod handler;
pub mod registry;

pub use errors::HandlerError;
pub use handler::{Handler, Predicate};
pub use registry::{DEFAULT_PRIORITY, DispatchOutcome, HandlerId, HandlerRegistry, LOWEST_PRIORITY};
