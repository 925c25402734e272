//! In-process webview transport.
//!
//! [`webview_channel`] connects a controller-side [`WebviewPanel`] to a surface-side
//! [`SurfacePort`] with one unbounded FIFO per direction. Delivery is best effort: once the panel
//! is disposed, or the surface end is gone, posts report `false` and the message is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::events::EventEmitter;
use crate::protocol::PersistedSurfaceState;
use crate::surface::SurfaceHost;
use crate::sync::lock;

/// Controller-side handle on an isolated rendering surface.
pub trait Webview: Send + Sync {
    /// Replaces the whole surface document; the surface reloads from it.
    fn set_html(&self, html: String);

    /// Posts a JSON message to the surface. Returns `false` when the message was dropped.
    fn post_message(&self, message: Value) -> bool;

    fn reveal(&self, preserve_focus: bool);

    fn is_active(&self) -> bool;

    fn is_visible(&self) -> bool;

    fn view_state_changes(&self) -> broadcast::Receiver<PanelViewState>;

    /// Fires once when the panel is closed, whether by the host or through [`Webview::dispose`].
    fn on_did_dispose(&self) -> broadcast::Receiver<()>;

    fn dispose(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelViewState {
    pub active: bool,
    pub visible: bool,
}

/// What the surface receives from its host.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceInput {
    Load(String),
    Message(Value),
    Dispose,
}

type PersistedSlot = Arc<Mutex<Option<PersistedSurfaceState>>>;

pub struct WebviewPanel {
    to_surface: mpsc::UnboundedSender<SurfaceInput>,
    view_state: Mutex<PanelViewState>,
    view_state_events: EventEmitter<PanelViewState>,
    dispose_events: EventEmitter<()>,
    persisted: PersistedSlot,
    disposed: AtomicBool,
}

impl WebviewPanel {
    /// Surface state the host kept for this panel, used to revive a recreated surface.
    pub fn persisted_state(&self) -> Option<PersistedSurfaceState> {
        lock(&self.persisted).clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Records a host-side activity/visibility change and notifies observers.
    pub fn set_view_state(&self, active: bool, visible: bool) {
        let next = PanelViewState { active, visible };
        *lock(&self.view_state) = next;
        self.view_state_events.fire(next);
    }

    fn send(&self, input: SurfaceInput) -> bool {
        if self.is_disposed() {
            tracing::debug!("surface disposed; dropping input");
            return false;
        }
        if self.to_surface.send(input).is_err() {
            tracing::debug!("surface gone; dropping input");
            return false;
        }
        true
    }
}

impl Webview for WebviewPanel {
    fn set_html(&self, html: String) {
        self.send(SurfaceInput::Load(html));
    }

    fn post_message(&self, message: Value) -> bool {
        self.send(SurfaceInput::Message(message))
    }

    fn reveal(&self, preserve_focus: bool) {
        if self.is_disposed() {
            return;
        }
        let current = *lock(&self.view_state);
        let active = current.active || !preserve_focus;
        if !current.visible || active != current.active {
            self.set_view_state(active, true);
        }
    }

    fn is_active(&self) -> bool {
        !self.is_disposed() && lock(&self.view_state).active
    }

    fn is_visible(&self) -> bool {
        !self.is_disposed() && lock(&self.view_state).visible
    }

    fn view_state_changes(&self) -> broadcast::Receiver<PanelViewState> {
        self.view_state_events.subscribe()
    }

    fn on_did_dispose(&self) -> broadcast::Receiver<()> {
        self.dispose_events.subscribe()
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.to_surface.send(SurfaceInput::Dispose);
        self.dispose_events.fire(());
    }
}

/// Surface-side API: posting back to the controller and the host-kept state slot.
#[derive(Clone)]
pub struct PortHost {
    outbox: mpsc::UnboundedSender<Value>,
    persisted: PersistedSlot,
}

impl SurfaceHost for PortHost {
    fn post_message(&self, message: Value) {
        if self.outbox.send(message).is_err() {
            tracing::debug!("controller gone; dropping surface message");
        }
    }

    fn get_state(&self) -> Option<PersistedSurfaceState> {
        lock(&self.persisted).clone()
    }

    fn set_state(&self, state: &PersistedSurfaceState) {
        *lock(&self.persisted) = Some(state.clone());
    }
}

pub struct SurfacePort {
    inbox: mpsc::UnboundedReceiver<SurfaceInput>,
    host: PortHost,
}

impl SurfacePort {
    pub fn host(&self) -> PortHost {
        self.host.clone()
    }

    pub async fn recv(&mut self) -> Option<SurfaceInput> {
        self.inbox.recv().await
    }

    /// Blocking receive for a surface running on its own thread.
    pub fn blocking_recv(&mut self) -> Option<SurfaceInput> {
        self.inbox.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<SurfaceInput> {
        self.inbox.try_recv().ok()
    }
}

/// Creates a connected panel/surface pair. The returned receiver yields the surface's
/// outbound messages to the controller.
pub fn webview_channel(
    initial: PanelViewState,
    persisted: Option<PersistedSurfaceState>,
) -> (Arc<WebviewPanel>, SurfacePort, mpsc::UnboundedReceiver<Value>) {
    let (to_surface, inbox) = mpsc::unbounded_channel();
    let (outbox, from_surface) = mpsc::unbounded_channel();
    let persisted: PersistedSlot = Arc::new(Mutex::new(persisted));

    let panel = Arc::new(WebviewPanel {
        to_surface,
        view_state: Mutex::new(initial),
        view_state_events: EventEmitter::new(),
        dispose_events: EventEmitter::new(),
        persisted: Arc::clone(&persisted),
        disposed: AtomicBool::new(false),
    });
    let port = SurfacePort {
        inbox,
        host: PortHost { outbox, persisted },
    };
    (panel, port, from_surface)
}
