//! Shared engine instance with reference-counted lifecycle.
//!
//! An [`EngineContext`] is built once at the application root and handed to
//! every consumer. It creates the engine lazily, connects it when the first
//! consumer arrives (if the policy says so) and disconnects it when the last
//! one leaves, optionally after a grace period.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use courier_core::Disposer;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::engine::MessageEngine;
use crate::errors::EngineError;
use crate::listeners::Listeners;

/// Builds the engine on first use.
pub type EngineFactory =
    Box<dyn Fn() -> Result<Arc<dyn MessageEngine>, EngineError> + Send + Sync>;

/// Connection policy tied to the reference count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecyclePolicy {
    /// Connect on the 0→1 transition.
    pub auto_connect: bool,
    /// Wait this long after the →0 transition before disconnecting.
    pub keep_alive: Option<Duration>,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            auto_connect: true,
            keep_alive: None,
        }
    }
}

/// Lifecycle notifications from an [`EngineContext`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A reference was added; `count` is the new total.
    Acquired {
        /// References after the change.
        count: usize,
    },
    /// A reference was removed; `count` is the new total.
    Released {
        /// References after the change.
        count: usize,
    },
    /// The engine was told to disconnect because nobody holds it.
    Disconnected,
}

/// Non-negative consumer counter.
#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    /// A counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one; returns the new count.
    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Remove one; `None` if already zero.
    pub fn decrement(&self) -> Option<usize> {
        self.count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    /// Current count.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

struct ContextInner {
    factory: EngineFactory,
    instance: Mutex<Option<Arc<dyn MessageEngine>>>,
    refs: Arc<RefCount>,
    policy: LifecyclePolicy,
    lifecycle: Listeners<LifecycleEvent>,
    /// Bumped whenever a pending grace-period disconnect must be abandoned.
    generation: AtomicU64,
}

impl ContextInner {
    fn disconnect_now(&self) {
        let engine = self.instance.lock().clone();
        if let Some(engine) = engine {
            info!("last reference released, disconnecting engine");
            engine.disconnect();
            let _ = self.lifecycle.emit(&LifecycleEvent::Disconnected);
        }
    }
}

/// Owner of the shared engine instance.
///
/// Cheap to clone; clones share the same instance and count.
#[derive(Clone)]
pub struct EngineContext {
    inner: Arc<ContextInner>,
}

impl EngineContext {
    /// Context over `factory` with the default policy and a fresh counter.
    pub fn new(
        factory: impl Fn() -> Result<Arc<dyn MessageEngine>, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self::with_parts(Box::new(factory), Arc::new(RefCount::new()), LifecyclePolicy::default())
    }

    /// Context over explicit parts.
    pub fn with_parts(factory: EngineFactory, refs: Arc<RefCount>, policy: LifecyclePolicy) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                factory,
                instance: Mutex::new(None),
                refs,
                policy,
                lifecycle: Listeners::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Start building a context over `factory`.
    pub fn builder(
        factory: impl Fn() -> Result<Arc<dyn MessageEngine>, EngineError> + Send + Sync + 'static,
    ) -> EngineContextBuilder {
        EngineContextBuilder {
            factory: Box::new(factory),
            refs: None,
            policy: LifecyclePolicy::default(),
        }
    }

    /// The shared engine, created on first call.
    ///
    /// A failed construction is not cached; the next call tries again.
    pub fn get_instance(&self) -> Result<Arc<dyn MessageEngine>, EngineError> {
        let mut slot = self.inner.instance.lock();
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.inner.factory)().inspect_err(|err| {
            error!(error = %err, "engine construction failed");
        })?;
        debug!("engine instance created");
        *slot = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Whether the engine has been created.
    pub fn has_instance(&self) -> bool {
        self.inner.instance.lock().is_some()
    }

    /// Register a consumer. Returns the new count.
    ///
    /// On the 0→1 transition the engine is created if needed and, when the
    /// policy says so, asked to connect. If creation fails the count is unchanged.
    pub fn add_reference(&self) -> Result<usize, EngineError> {
        let engine = self.get_instance()?;
        let _ = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let count = self.inner.refs.increment();
        debug!(count, "engine reference added");

        // The status snapshot can lag a queued disconnect, so always ask.
        // The engine ignores connect while already connected.
        if count == 1 && self.inner.policy.auto_connect {
            engine.connect();
        }
        let _ = self.inner.lifecycle.emit(&LifecycleEvent::Acquired { count });
        Ok(count)
    }

    /// Unregister a consumer. Returns the new count.
    ///
    /// At zero this is a no-op. On the →0 transition the engine is
    /// disconnected, immediately or after the keep-alive grace period unless
    /// a new reference arrives first.
    pub fn remove_reference(&self) -> usize {
        let Some(count) = self.inner.refs.decrement() else {
            debug!("remove_reference at zero ignored");
            return 0;
        };
        debug!(count, "engine reference removed");
        let _ = self.inner.lifecycle.emit(&LifecycleEvent::Released { count });

        if count == 0 {
            self.schedule_disconnect();
        }
        count
    }

    fn schedule_disconnect(&self) {
        let Some(grace) = self.inner.policy.keep_alive else {
            self.inner.disconnect_now();
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.inner.disconnect_now();
            return;
        };

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        debug!(?grace, "disconnect scheduled after grace period");
        let _timer = runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.generation.load(Ordering::SeqCst) == generation && inner.refs.get() == 0 {
                inner.disconnect_now();
            } else {
                debug!("grace period disconnect cancelled");
            }
        });
    }

    /// Add a reference held by the returned lease.
    pub fn acquire(&self) -> Result<EngineLease, EngineError> {
        let _ = self.add_reference()?;
        let engine = self.get_instance()?;
        Ok(EngineLease {
            context: self.clone(),
            engine,
        })
    }

    /// Current reference count.
    pub fn reference_count(&self) -> usize {
        self.inner.refs.get()
    }

    /// The policy in force.
    pub fn policy(&self) -> LifecyclePolicy {
        self.inner.policy
    }

    /// Observe lifecycle events.
    pub fn on_lifecycle(&self, callback: Arc<dyn Fn(&LifecycleEvent) + Send + Sync>) -> Disposer {
        self.inner.lifecycle.subscribe(callback)
    }

    /// Disconnect and forget the instance; the count returns to zero.
    pub fn reset(&self) {
        let _ = self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let engine = self.inner.instance.lock().take();
        self.inner.refs.reset();
        if let Some(engine) = engine {
            info!("engine context reset");
            engine.disconnect();
        }
    }
}

/// Builder for [`EngineContext`].
pub struct EngineContextBuilder {
    factory: EngineFactory,
    refs: Option<Arc<RefCount>>,
    policy: LifecyclePolicy,
}

impl EngineContextBuilder {
    /// Use an externally owned counter.
    #[must_use]
    pub fn ref_count(mut self, refs: Arc<RefCount>) -> Self {
        self.refs = Some(refs);
        self
    }

    /// Set the lifecycle policy.
    #[must_use]
    pub fn policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Finish.
    pub fn build(self) -> EngineContext {
        let refs = self.refs.unwrap_or_default();
        EngineContext::with_parts(self.factory, refs, self.policy)
    }
}

impl fmt::Debug for EngineContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContextBuilder")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("has_instance", &self.has_instance())
            .field("references", &self.reference_count())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

/// A counted hold on the shared engine. Dropping it releases the reference.
pub struct EngineLease {
    context: EngineContext,
    engine: Arc<dyn MessageEngine>,
}

impl EngineLease {
    /// The engine this lease keeps alive.
    pub fn engine(&self) -> &Arc<dyn MessageEngine> {
        &self.engine
    }

    /// The context the lease came from.
    pub fn context(&self) -> &EngineContext {
        &self.context
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let _ = self.context.remove_reference();
    }
}

impl fmt::Debug for EngineLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLease")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
