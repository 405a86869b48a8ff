//! Handler registry.
//!
//! Maintains `(predicate, handler, priority)` entries sorted by priority,
//! highest first, ties in registration order. [`HandlerRegistry::process`]
//! runs every matching handler against an envelope, isolating each one from
//! the others' failures.
//!
//! `process` works on a snapshot taken when it starts. Handlers may register
//! or dispose handlers (including themselves) while running; the change is
//! visible from the next `process` call.

use std::cmp::Reverse;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use courier_core::{Action, Disposer, Envelope, Route, panic_message};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::handler::{self, Handler, Predicate};

/// Priority used by [`HandlerRegistry::register`].
pub const DEFAULT_PRIORITY: i32 = 0;

/// Runs after every other handler.
pub const LOWEST_PRIORITY: i32 = i32::MIN;

/// Identifies one registration. Never reused within a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Raw value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// What one `process` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers whose predicate matched.
    pub matched: usize,
    /// Matched handlers that returned an error or panicked.
    pub failed: usize,
}

impl DispatchOutcome {
    /// Matched handlers that completed.
    pub fn succeeded(&self) -> usize {
        self.matched - self.failed
    }
}

#[derive(Clone)]
struct Entry {
    id: HandlerId,
    priority: i32,
    predicate: Predicate,
    handler: Arc<dyn Handler>,
}

struct RegistryInner {
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Priority-ordered envelope dispatch.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct HandlerRegistry {
    inner: Arc<RegistryInner>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register at [`DEFAULT_PRIORITY`].
    pub fn register(&self, predicate: Predicate, handler: impl Handler + 'static) -> Disposer {
        self.register_with_priority(predicate, handler, DEFAULT_PRIORITY)
    }

    /// Register a handler. The disposer removes exactly this registration.
    pub fn register_with_priority(
        &self,
        predicate: Predicate,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut entries = self.inner.entries.lock();
            entries.push(Entry {
                id,
                priority,
                predicate,
                handler: Arc::new(handler),
            });
            // Stable sort keeps registration order among equal priorities.
            entries.sort_by_key(|e| Reverse(e.priority));
        }
        debug!(handler_id = %id, priority, "registered handler");

        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let mut entries = inner.entries.lock();
            let before = entries.len();
            entries.retain(|e| e.id != id);
            if entries.len() < before {
                debug!(handler_id = %id, "unregistered handler");
            }
        })
    }

    /// Register for every envelope on `route`.
    pub fn register_for_route(
        &self,
        route: Route,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.register_with_priority(handler::route_is(route), handler, priority)
    }

    /// Register for every envelope with `action`.
    pub fn register_for_action(
        &self,
        action: Action,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.register_with_priority(handler::action_is(action), handler, priority)
    }

    /// Register for one `(route, action)` pair.
    pub fn register_for_route_and_action(
        &self,
        route: Route,
        action: Action,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.register_with_priority(handler::route_and_action(route, action), handler, priority)
    }

    /// Run every matching handler against `envelope`, highest priority first.
    ///
    /// A handler that returns an error or panics is logged and counted in
    /// [`DispatchOutcome::failed`]; the rest still run. A panicking predicate
    /// counts as no match.
    pub fn process(&self, envelope: &Envelope) -> DispatchOutcome {
        let snapshot: Vec<Entry> = self.inner.entries.lock().clone();
        let route = envelope.route();
        let action = envelope.action();
        let mut outcome = DispatchOutcome::default();

        for entry in &snapshot {
            let matched = match catch_unwind(AssertUnwindSafe(|| (entry.predicate)(envelope))) {
                Ok(matched) => matched,
                Err(panic) => {
                    warn!(
                        handler_id = %entry.id,
                        %route,
                        %action,
                        panic = %panic_message(panic.as_ref()),
                        "predicate panicked, treating as no match"
                    );
                    false
                }
            };
            if !matched {
                continue;
            }
            outcome.matched += 1;

            match catch_unwind(AssertUnwindSafe(|| entry.handler.handle(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    outcome.failed += 1;
                    error!(
                        handler_id = %entry.id,
                        priority = entry.priority,
                        %route,
                        %action,
                        error = %err,
                        "handler failed"
                    );
                }
                Err(panic) => {
                    outcome.failed += 1;
                    error!(
                        handler_id = %entry.id,
                        priority = entry.priority,
                        %route,
                        %action,
                        panic = %panic_message(panic.as_ref()),
                        "handler panicked"
                    );
                }
            }
        }

        trace!(
            %route,
            %action,
            matched = outcome.matched,
            failed = outcome.failed,
            "processed envelope"
        );
        outcome
    }

    /// Remove every handler. Outstanding disposers become no-ops.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.inner.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        debug!(removed, "cleared handler registry");
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Registered ids in dispatch order.
    pub fn handler_ids(&self) -> Vec<HandlerId> {
        self.inner.entries.lock().iter().map(|e| e.id).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.handler_count())
            .finish()
    }
}
