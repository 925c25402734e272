//! Single authoritative state container with subscribe/notify semantics.
//!
//! State is immutable: every dispatch runs a pure reducer and swaps in a fresh `Arc<S>`, so a
//! reader holding a snapshot never observes a partial update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::sync::lock;

/// Pure `(state, action) -> state` transition.
pub type Reducer<S, A> = fn(&S, &A) -> S;

type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

struct StoreInner<S, A> {
    state: RwLock<Arc<S>>,
    reducer: Reducer<S, A>,
    listeners: Mutex<Vec<(u64, Listener<S>)>>,
    next_listener_id: AtomicU64,
}

pub struct Store<S, A> {
    inner: Arc<StoreInner<S, A>>,
}

impl<S, A> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> Store<S, A>
where
    S: Send + Sync + 'static,
    A: 'static,
{
    pub fn new(initial: S, reducer: Reducer<S, A>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(initial)),
                reducer,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn get_state(&self) -> Arc<S> {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Applies `action` and notifies every listener with the new snapshot.
    ///
    /// Listeners run on the dispatching thread after the state lock is released, so a listener
    /// may read the store or dispatch again.
    pub fn dispatch(&self, action: A) {
        let next = {
            let mut guard = self
                .inner
                .state
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let next = Arc::new((self.inner.reducer)(&**guard, &action));
            *guard = Arc::clone(&next);
            next
        };

        let listeners: Vec<Listener<S>> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&next);
        }
    }

    /// Registers a listener. It stays registered until [`Subscription::unsubscribe`] is called;
    /// dropping the handle does not unsubscribe.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<S>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));

        let weak: Weak<StoreInner<S, A>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.listeners).retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
