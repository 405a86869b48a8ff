//! Handler and predicate types.
//!
//! A [`Handler`] reacts to envelopes; a [`Predicate`] decides which envelopes
//! it sees. Any `Fn(&Envelope) -> Result<(), HandlerError>` closure is a
//! handler, so most consumers never implement the trait by hand.

use std::sync::Arc;

use courier_core::{Action, Envelope, Route};

use crate::errors::HandlerError;

/// Reacts to matching envelopes.
pub trait Handler: Send + Sync {
    /// Process one envelope.
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        self(envelope)
    }
}

/// A pure test over an envelope.
pub type Predicate = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

/// Matches envelopes on `route`.
pub fn route_is(route: Route) -> Predicate {
    Arc::new(move |e: &Envelope| e.route() == route)
}

/// Matches envelopes with `action`.
pub fn action_is(action: Action) -> Predicate {
    Arc::new(move |e: &Envelope| e.action() == action)
}

/// Matches envelopes on both `route` and `action`.
pub fn route_and_action(route: Route, action: Action) -> Predicate {
    Arc::new(move |e: &Envelope| e.is(route, action))
}

/// Matches everything.
pub fn any() -> Predicate {
    Arc::new(|_: &Envelope| true)
}
