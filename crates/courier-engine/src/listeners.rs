//! Callback sets with fault isolation.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use courier_core::{Disposer, panic_message};
use parking_lot::Mutex;
use tracing::error;

/// A shared callback.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// An ordered set of callbacks for values of type `T`.
///
/// Callbacks run in subscription order. A panicking callback is logged and
/// the remaining callbacks still run.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T: 'static> Listeners<T> {
    /// An empty set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Add a callback. The returned disposer removes exactly this one.
    pub fn subscribe(&self, callback: Callback<T>) -> Disposer {
        let id = {
            let mut set = self.inner.lock();
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, callback));
            id
        };

        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every callback with `value`. Returns how many completed.
    ///
    /// Works on a snapshot, so callbacks may subscribe or dispose freely.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<(u64, Callback<T>)> = self.inner.lock().entries.clone();

        let mut completed = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    error!(
                        listener_id = id,
                        panic = %panic_message(panic.as_ref()),
                        "listener panicked"
                    );
                }
            }
        }
        completed
    }

    /// Number of live callbacks.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.inner.lock().entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use courier_logging::capture_logs;
    use tracing::Level;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Callback<u32> {
        let log = Arc::clone(log);
        Arc::new(move |v: &u32| log.lock().push(format!("{tag}{v}")))
    }

    #[test]
    fn emit_in_subscription_order() {
        let listeners = Listeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = listeners.subscribe(recorder(&log, "a"));
        let _b = listeners.subscribe(recorder(&log, "b"));

        assert_eq!(listeners.emit(&1), 2);
        assert_eq!(*log.lock(), vec!["a1", "b1"]);
    }

    #[test]
    fn dispose_removes_only_its_callback() {
        let listeners = Listeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = listeners.subscribe(recorder(&log, "a"));
        let _b = listeners.subscribe(recorder(&log, "b"));

        a.dispose();
        a.dispose();
        assert_eq!(listeners.len(), 1);
        let _ = listeners.emit(&2);
        assert_eq!(*log.lock(), vec!["b2"]);
    }

    #[test]
    fn panicking_listener_is_isolated_and_logged() {
        let (logs, _guard) = capture_logs();
        let listeners = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = listeners.subscribe(Arc::new(|_: &u32| panic!("listener blew up")));
        let h = Arc::clone(&hits);
        let _good = listeners.subscribe(Arc::new(move |_: &u32| {
            let _ = h.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(listeners.emit(&0), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let errors = logs.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field("panic"), Some("listener blew up"));
    }

    #[test]
    fn subscribe_during_emit_applies_next_time() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let disposers = Arc::new(Mutex::new(Vec::new()));

        let inner = listeners.clone();
        let h = Arc::clone(&hits);
        let d = Arc::clone(&disposers);
        let _outer = listeners.subscribe(Arc::new(move |_: &u32| {
            let h = Arc::clone(&h);
            d.lock().push(inner.subscribe(Arc::new(move |_: &u32| {
                let _ = h.fetch_add(1, Ordering::SeqCst);
            })));
        }));

        assert_eq!(listeners.emit(&0), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        let _ = listeners.emit(&0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposer_outliving_set_is_harmless() {
        let listeners: Listeners<u32> = Listeners::new();
        let disposer = listeners.subscribe(Arc::new(|_: &u32| {}));
        drop(listeners);
        disposer.dispose();
        assert!(disposer.is_disposed());
    }

    #[test]
    fn clear_removes_everything() {
        let listeners: Listeners<u32> = Listeners::default();
        let _a = listeners.subscribe(Arc::new(|_: &u32| {}));
        listeners.clear();
        assert!(listeners.is_empty());
        assert_eq!(listeners.emit(&0), 0);
    }
}
