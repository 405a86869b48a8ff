//! Mount-scoped access to the shared engine.
//!
//! A [`MessageSubscription`] is what one top-level consumer holds while it is
//! alive. Mounting feeds every envelope into a registry owned by this
//! subscription alone and then takes a lease on the shared engine, so
//! handlers registered by a torn-down consumer never outlive it.

use std::fmt;
use std::sync::Arc;

use courier_core::{Action, AgentId, ConnectionStatus, Disposer, Envelope, MessageType, Route};
use courier_dispatch::{Handler, HandlerRegistry, Predicate};
use courier_engine::{
    EngineContext, EngineError, EngineLease, Listeners, MessageEngine, StatusCallback,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Engine-side subscriptions held while mounted.
struct Mounted {
    /// `None` until the setup hook has run.
    lease: Option<EngineLease>,
    message_feed: Disposer,
    status_feed: Disposer,
}

/// One consumer's view of the shared engine.
///
/// Dropping the subscription unmounts it.
pub struct MessageSubscription {
    engine: Arc<dyn MessageEngine>,
    registry: HandlerRegistry,
    statuses: Listeners<ConnectionStatus>,
    mounted: Mutex<Option<Mounted>>,
}

impl MessageSubscription {
    /// Acquire the shared engine and start routing its envelopes into a
    /// fresh registry.
    pub fn mount(context: &EngineContext) -> Result<Self, EngineError> {
        Self::mount_with(context, |_| {})
    }

    /// Like [`mount`](Self::mount), with `setup` run once the engine feeds
    /// are wired but before the lease is taken.
    ///
    /// Taking the lease may start the connection, so handlers and status
    /// callbacks registered in `setup` observe `connection:open` and every
    /// transition of that connect. Handlers registered later may miss them.
    pub fn mount_with(
        context: &EngineContext,
        setup: impl FnOnce(&Self),
    ) -> Result<Self, EngineError> {
        let engine = context.get_instance()?;
        let registry = HandlerRegistry::new();
        let statuses = Listeners::new();

        let feed = registry.clone();
        let message_feed = engine.on_message(Arc::new(move |envelope: &Envelope| {
            let _ = feed.process(envelope);
        }));
        let fanout = statuses.clone();
        let status_feed = engine.on_status_change(Arc::new(move |status: &ConnectionStatus| {
            let _ = fanout.emit(status);
        }));

        let subscription = Self {
            engine,
            registry,
            statuses,
            mounted: Mutex::new(Some(Mounted {
                lease: None,
                message_feed,
                status_feed,
            })),
        };
        setup(&subscription);

        let lease = context.acquire()?;
        if let Some(mounted) = subscription.mounted.lock().as_mut() {
            mounted.lease = Some(lease);
        } else {
            debug!("unmounted during setup, lease returned");
            drop(lease);
        }
        info!(references = context.reference_count(), "subscription mounted");
        Ok(subscription)
    }

    /// Stop routing, drop every handler and status callback, and release the
    /// engine. Later calls do nothing.
    pub fn unmount(&self) {
        let Some(mounted) = self.mounted.lock().take() else {
            return;
        };
        mounted.message_feed.dispose();
        mounted.status_feed.dispose();
        self.statuses.clear();
        self.registry.clear();
        let references = mounted.lease.map(|lease| {
            let context = lease.context().clone();
            drop(lease);
            context.reference_count()
        });
        info!(?references, "subscription unmounted");
    }

    /// Whether [`unmount`](Self::unmount) has not run yet.
    pub fn is_mounted(&self) -> bool {
        self.mounted.lock().is_some()
    }

    /// The registry envelopes are routed into.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// The shared engine.
    pub fn engine(&self) -> &Arc<dyn MessageEngine> {
        &self.engine
    }

    /// Observe status transitions until unmounted.
    pub fn on_status(&self, callback: StatusCallback) -> Disposer {
        if !self.is_mounted() {
            debug!("on_status after unmount ignored");
            return Disposer::noop();
        }
        self.statuses.subscribe(callback)
    }

    /// Send a chat message through the shared engine.
    pub fn send_message(&self, content: &str, message_type: MessageType, agent_id: Option<&AgentId>) {
        if !self.is_mounted() {
            warn!("send_message after unmount dropped");
            return;
        }
        self.engine.send_message(content, message_type, agent_id);
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.engine.status()
    }

    /// Whether the shared engine is connected.
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    // ─── Registry pass-throughs ───

    /// See [`HandlerRegistry::register`].
    pub fn register(&self, predicate: Predicate, handler: impl Handler + 'static) -> Disposer {
        self.registry.register(predicate, handler)
    }

    /// See [`HandlerRegistry::register_with_priority`].
    pub fn register_with_priority(
        &self,
        predicate: Predicate,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.registry.register_with_priority(predicate, handler, priority)
    }

    /// See [`HandlerRegistry::register_for_route`].
    pub fn register_for_route(
        &self,
        route: Route,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.registry.register_for_route(route, handler, priority)
    }

    /// See [`HandlerRegistry::register_for_action`].
    pub fn register_for_action(
        &self,
        action: Action,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.registry.register_for_action(action, handler, priority)
    }

    /// See [`HandlerRegistry::register_for_route_and_action`].
    pub fn register_for_route_and_action(
        &self,
        route: Route,
        action: Action,
        handler: impl Handler + 'static,
        priority: i32,
    ) -> Disposer {
        self.registry
            .register_for_route_and_action(route, action, handler, priority)
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl fmt::Debug for MessageSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSubscription")
            .field("mounted", &self.is_mounted())
            .field("handlers", &self.registry.handler_count())
            .finish_non_exhaustive()
    }
}
