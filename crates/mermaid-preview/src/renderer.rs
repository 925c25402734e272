//! Generic store-to-view binding with a trailing debounce.
//!
//! A [`Renderer`] is bound to a [`Store`] and an async selector deriving render parameters from
//! a state snapshot. [`Renderer::init`] performs the first paint through [`Renderer::render`];
//! every later store notification restarts a single per-instance timer, and only the timer that
//! survives the quiet period calls [`Renderer::update_view`] with params derived from the last
//! state it observed.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::constants::DEFAULT_DEBOUNCE;
use crate::store::{Store, Subscription};
use crate::sync::lock;

/// Async projection from a state snapshot to render parameters.
pub type Selector<S, P> = Arc<dyn Fn(Arc<S>) -> BoxFuture<'static, P> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendererError {
    #[error("[Renderer::init] store or selector not binded")]
    NotBound,
    #[error("[Renderer::updateView] selector not binded")]
    SelectorNotBound,
    #[error("[Renderer::updateView] no async runtime to schedule the update on")]
    NoRuntime,
}

struct BindingInner<P, S, A> {
    store: Option<Store<S, A>>,
    selector: Option<Selector<S, P>>,
    subscription: Option<Subscription>,
    runtime: Option<Handle>,
    timer: Option<JoinHandle<()>>,
    timeout: Duration,
}

/// Binding state embedded in every [`Renderer`] implementation.
pub struct RendererBinding<P, S, A> {
    inner: Mutex<BindingInner<P, S, A>>,
}

impl<P, S, A> Default for RendererBinding<P, S, A> {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_DEBOUNCE)
    }
}

impl<P, S, A> RendererBinding<P, S, A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BindingInner {
                store: None,
                selector: None,
                subscription: None,
                runtime: None,
                timer: None,
                timeout,
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        lock(&self.inner).timeout
    }

    pub fn set_timeout(&self, timeout: Duration) {
        lock(&self.inner).timeout = timeout;
    }

    pub fn is_bound(&self) -> bool {
        let inner = lock(&self.inner);
        inner.store.is_some() && inner.selector.is_some()
    }

    pub fn has_pending_update(&self) -> bool {
        lock(&self.inner)
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stops listening to the store and cancels any scheduled update.
    pub fn unbind(&self) {
        let (subscription, timer) = {
            let mut inner = lock(&self.inner);
            inner.store = None;
            inner.selector = None;
            (inner.subscription.take(), inner.timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
    }
}

impl<P, S, A> RendererBinding<P, S, A>
where
    S: Send + Sync + 'static,
    A: 'static,
{
    fn bound(&self) -> Option<(Store<S, A>, Selector<S, P>)> {
        let inner = lock(&self.inner);
        Some((inner.store.clone()?, inner.selector.clone()?))
    }
}

pub trait Renderer: Send + Sync + Sized + 'static {
    type Params: Send + 'static;
    type State: Send + Sync + 'static;
    type Action: 'static;

    fn binding(&self) -> &RendererBinding<Self::Params, Self::State, Self::Action>;

    /// First paint.
    fn render(&self, params: Self::Params);

    /// Incremental update after a debounced store change.
    fn update_view(&self, params: Self::Params);

    fn notify_error(&self, error: RendererError);

    /// Records `store` and `selector` and starts reacting to store notifications.
    ///
    /// Binding again replaces the previous store subscription.
    fn bind(
        self: &Arc<Self>,
        store: Store<Self::State, Self::Action>,
        selector: Selector<Self::State, Self::Params>,
    ) {
        let previous = {
            let mut inner = lock(&self.binding().inner);
            inner.store = Some(store.clone());
            inner.selector = Some(selector);
            inner.runtime = Handle::try_current().ok();
            inner.subscription.take()
        };
        if let Some(previous) = previous {
            previous.unsubscribe();
        }

        let weak = Arc::downgrade(self);
        let subscription = store.subscribe(move |state| {
            if let Some(renderer) = weak.upgrade() {
                debounce_update_view(&renderer, Arc::clone(state));
            }
        });
        lock(&self.binding().inner).subscription = Some(subscription);
    }

    /// Renders once from the current store state.
    fn init(&self) -> impl Future<Output = ()> + Send {
        async move {
            let Some((store, selector)) = self.binding().bound() else {
                self.notify_error(RendererError::NotBound);
                return;
            };
            let params = selector(store.get_state()).await;
            self.render(params);
        }
    }
}

fn debounce_update_view<R: Renderer>(renderer: &Arc<R>, state: Arc<R::State>) {
    let mut inner = lock(&renderer.binding().inner);
    let Some(selector) = inner.selector.clone() else {
        drop(inner);
        renderer.notify_error(RendererError::SelectorNotBound);
        return;
    };
    let Some(runtime) = inner.runtime.clone() else {
        drop(inner);
        renderer.notify_error(RendererError::NoRuntime);
        return;
    };

    if let Some(timer) = inner.timer.take() {
        timer.abort();
    }

    let timeout = inner.timeout;
    let weak = Arc::downgrade(renderer);
    inner.timer = Some(runtime.spawn(async move {
        tokio::time::sleep(timeout).await;
        let params = selector(state).await;
        if let Some(renderer) = weak.upgrade() {
            tracing::debug!(?timeout, "debounced view update");
            renderer.update_view(params);
        }
    }));
}
