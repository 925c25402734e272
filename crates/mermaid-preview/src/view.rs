//! Controller-side endpoint of the preview protocol.
//!
//! [`DiagramView`] is the concrete [`Renderer`]: the first paint replaces the whole surface
//! document, later debounced updates are posted as `update` commands. It also owns the
//! view-local state (activity, visibility, zoom), forwards zoom and capture requests, and turns
//! surface events into typed observer events.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::bootstrap::BootstrapDocument;
use crate::channel::{PanelViewState, Webview};
use crate::config::MermaidConfig;
use crate::constants::{
    DEFAULT_CAPTURE_TIMEOUT, DEFAULT_DEBOUNCE, ZOOM_DEFAULT_SCALE, ZOOM_MAX_SCALE, ZOOM_MIN_SCALE,
    ZOOM_SCALE_INTERVAL,
};
use crate::error::{PreviewError, Result};
use crate::events::{CaptureImageEndEvent, ErrorEvent, EventEmitter};
use crate::protocol::{CaptureImageParams, HostCommand, SurfaceEvent, command_of};
use crate::renderer::{Renderer, RendererBinding, RendererError};
use crate::sync::lock;
use crate::view_state::{ViewState, ViewStateAction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderParams {
    pub code: String,
    /// Mermaid configuration as JSON text.
    pub mermaid_config: String,
    pub background_color: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShowOptions {
    pub preserve_focus: bool,
}

/// UI-only state of one view instance. Never part of the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewLocalState {
    pub active: bool,
    pub visible: bool,
    pub scale: f64,
}

struct PendingCapture {
    id: u64,
    timer: Option<JoinHandle<()>>,
}

impl PendingCapture {
    fn cancel(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

struct ViewInner {
    panel: Option<Arc<dyn Webview>>,
    state: ViewLocalState,
    capture: Option<PendingCapture>,
    next_capture_id: u64,
}

pub struct DiagramView {
    binding: RendererBinding<RenderParams, ViewState, ViewStateAction>,
    show_options: ShowOptions,
    capture_timeout: Option<Duration>,
    runtime: Option<Handle>,
    inner: Mutex<ViewInner>,

    errors: EventEmitter<ErrorEvent>,
    captures: EventEmitter<CaptureImageEndEvent>,
    activity: EventEmitter<bool>,
    visibility: EventEmitter<bool>,
    render_requested: EventEmitter<()>,
    disposed: EventEmitter<()>,
}

impl DiagramView {
    pub fn new(panel: Arc<dyn Webview>, show_options: ShowOptions) -> Self {
        let state = ViewLocalState {
            active: panel.is_active(),
            visible: panel.is_visible(),
            scale: ZOOM_DEFAULT_SCALE,
        };
        Self {
            binding: RendererBinding::with_timeout(DEFAULT_DEBOUNCE),
            show_options,
            capture_timeout: Some(DEFAULT_CAPTURE_TIMEOUT),
            runtime: Handle::try_current().ok(),
            inner: Mutex::new(ViewInner {
                panel: Some(panel),
                state,
                capture: None,
                next_capture_id: 0,
            }),
            errors: EventEmitter::new(),
            captures: EventEmitter::new(),
            activity: EventEmitter::new(),
            visibility: EventEmitter::new(),
            render_requested: EventEmitter::new(),
            disposed: EventEmitter::new(),
        }
    }

    pub fn with_debounce(self, debounce: Duration) -> Self {
        self.binding.set_timeout(debounce);
        self
    }

    /// `None` waits for a capture response forever.
    pub fn with_capture_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Starts from a previously saved zoom level (surface revival).
    pub fn with_scale(self, scale: f64) -> Self {
        if (ZOOM_MIN_SCALE..=ZOOM_MAX_SCALE).contains(&scale) {
            lock(&self.inner).state.scale = scale;
        }
        self
    }

    /// Forwards surface messages and panel view-state changes to this view until the surface
    /// side closes or the view is dropped. Closing the panel, or losing the surface channel,
    /// disposes the view.
    pub fn listen(self: &Arc<Self>, mut inbound: UnboundedReceiver<Value>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let panel = self.panel();
        let mut view_states = panel.as_ref().map(|p| p.view_state_changes());
        let mut panel_closed = panel.as_ref().map(|p| p.on_did_dispose());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = inbound.recv() => {
                        let Some(view) = weak.upgrade() else { break };
                        let Some(message) = message else {
                            tracing::debug!("surface channel closed");
                            view.dispose();
                            break;
                        };
                        view.on_did_receive_message(&message);
                    }
                    change = next_view_state(&mut view_states) => {
                        let Some(view) = weak.upgrade() else { break };
                        view.on_did_change_view_state(change.active, change.visible);
                    }
                    () = closed(&mut panel_closed) => {
                        tracing::debug!("panel closed");
                        if let Some(view) = weak.upgrade() {
                            view.dispose();
                        }
                        break;
                    }
                }
            }
            tracing::debug!("diagram view stopped listening");
        })
    }

    pub fn show_options(&self) -> ShowOptions {
        self.show_options
    }

    pub fn active(&self) -> bool {
        lock(&self.inner).state.active
    }

    pub fn visible(&self) -> bool {
        lock(&self.inner).state.visible
    }

    pub fn scale(&self) -> f64 {
        lock(&self.inner).state.scale
    }

    pub fn view_local_state(&self) -> ViewLocalState {
        lock(&self.inner).state
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner).panel.is_none()
    }

    pub fn has_pending_capture(&self) -> bool {
        lock(&self.inner).capture.is_some()
    }

    pub fn on_did_error(&self) -> broadcast::Receiver<ErrorEvent> {
        self.errors.subscribe()
    }

    pub fn on_did_capture_image(&self) -> broadcast::Receiver<CaptureImageEndEvent> {
        self.captures.subscribe()
    }

    pub fn on_did_change_view_state_activity(&self) -> broadcast::Receiver<bool> {
        self.activity.subscribe()
    }

    pub fn on_did_change_view_state_visibility(&self) -> broadcast::Receiver<bool> {
        self.visibility.subscribe()
    }

    /// Fired before every render or update, so observers can drop stale error output.
    pub fn on_did_view_render_requested(&self) -> broadcast::Receiver<()> {
        self.render_requested.subscribe()
    }

    pub fn on_did_dispose(&self) -> broadcast::Receiver<()> {
        self.disposed.subscribe()
    }

    pub fn reveal(&self) {
        self.render_requested.fire(());
        if let Some(panel) = self.panel() {
            panel.reveal(self.show_options.preserve_focus);
        }
    }

    pub fn zoom_in(&self) -> bool {
        self.zoom_to(self.scale() + ZOOM_SCALE_INTERVAL)
    }

    pub fn zoom_out(&self) -> bool {
        self.zoom_to(self.scale() - ZOOM_SCALE_INTERVAL)
    }

    pub fn zoom_reset(&self) -> bool {
        self.zoom_to(ZOOM_DEFAULT_SCALE)
    }

    /// Sets the zoom level, snapped to two decimals.
    ///
    /// A target outside `[ZOOM_MIN_SCALE, ZOOM_MAX_SCALE]` is rejected: the scale is kept and
    /// nothing is posted. Returns whether the target was accepted.
    pub fn zoom_to(&self, value: f64) -> bool {
        let target = (value * 100.0).round() / 100.0;
        if !(ZOOM_MIN_SCALE..=ZOOM_MAX_SCALE).contains(&target) {
            tracing::debug!(value, "zoom target out of range; ignored");
            return false;
        }
        let panel = {
            let mut inner = lock(&self.inner);
            inner.state.scale = target;
            inner.panel.clone()
        };
        if let Some(panel) = panel {
            post(panel.as_ref(), &HostCommand::ZoomTo { value: target });
        }
        true
    }

    /// Asks the surface for an image. The result arrives on [`Self::on_did_capture_image`].
    ///
    /// Only one capture may be outstanding; it ends with the surface's answer, the capture
    /// timeout or disposal of the view.
    pub fn capture_image(self: &Arc<Self>, params: CaptureImageParams) -> Result<()> {
        params
            .validate()
            .map_err(|reason| PreviewError::InvalidCaptureParams { reason })?;
        let message = serde_json::to_value(HostCommand::TakeImage(params))?;

        let mut inner = lock(&self.inner);
        if inner.capture.is_some() {
            return Err(PreviewError::CaptureInProgress);
        }
        let panel = inner.panel.clone().ok_or(PreviewError::SurfaceUnavailable)?;
        if !panel.post_message(message) {
            return Err(PreviewError::SurfaceUnavailable);
        }

        inner.next_capture_id += 1;
        let id = inner.next_capture_id;
        let timer = self.capture_timeout.and_then(|timeout| {
            let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
                tracing::warn!(id, "no async runtime; capture timeout disabled");
                return None;
            };
            let weak = Arc::downgrade(self);
            Some(runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(view) = weak.upgrade() {
                    view.expire_capture(id, timeout);
                }
            }))
        });
        inner.capture = Some(PendingCapture { id, timer });
        tracing::debug!(
            id,
            image_type = %params.image_type,
            target = ?params.target,
            "capture requested"
        );
        Ok(())
    }

    /// Dispatches one surface message. Unknown or malformed messages are logged and dropped.
    pub fn on_did_receive_message(&self, message: &Value) {
        let event = match SurfaceEvent::decode(message) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(command = ?command_of(message), "ignoring unknown surface message");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed surface message");
                return;
            }
        };

        match event {
            SurfaceEvent::OnTakeImage { image_type, data } => {
                self.finish_capture(CaptureImageEndEvent::Success { image_type, data });
            }
            SurfaceEvent::OnFailTakeImage { error } => {
                self.finish_capture(CaptureImageEndEvent::Failure {
                    error: error.message,
                });
            }
            SurfaceEvent::OnCopyImage => {
                self.finish_capture(CaptureImageEndEvent::CopyImageClipboard);
            }
            SurfaceEvent::OnParseError { error } => {
                self.errors.fire(ErrorEvent::DiagramParse(error.str));
            }
        }
    }

    /// Records new panel activity/visibility, firing only for values that actually changed.
    pub fn on_did_change_view_state(&self, active: bool, visible: bool) {
        let previous = {
            let mut inner = lock(&self.inner);
            let previous = inner.state;
            inner.state.active = active;
            inner.state.visible = visible;
            previous
        };
        if previous.active != active {
            self.activity.fire(active);
        }
        if previous.visible != visible {
            self.visibility.fire(visible);
        }
    }

    /// Releases the surface. Later posts are silently dropped; an outstanding capture ends in
    /// a failure event.
    pub fn dispose(&self) {
        let (panel, capture) = {
            let mut inner = lock(&self.inner);
            (inner.panel.take(), inner.capture.take())
        };
        self.binding.unbind();

        if let Some(capture) = capture {
            capture.cancel();
            self.captures.fire(CaptureImageEndEvent::Failure {
                error: "preview was closed before the image capture finished".into(),
            });
        }
        if let Some(panel) = panel {
            panel.dispose();
            self.disposed.fire(());
        }
    }

    fn panel(&self) -> Option<Arc<dyn Webview>> {
        lock(&self.inner).panel.clone()
    }

    fn finish_capture(&self, event: CaptureImageEndEvent) {
        let pending = lock(&self.inner).capture.take();
        match pending {
            Some(capture) => capture.cancel(),
            None => tracing::debug!("capture response without an outstanding request"),
        }
        self.captures.fire(event);
    }

    fn expire_capture(&self, id: u64, timeout: Duration) {
        let expired = {
            let mut inner = lock(&self.inner);
            match &inner.capture {
                Some(pending) if pending.id == id => inner.capture.take(),
                _ => None,
            }
        };
        if expired.is_some() {
            tracing::warn!(id, ?timeout, "image capture timed out");
            self.captures.fire(CaptureImageEndEvent::Failure {
                error: format!("image capture timed out after {}ms", timeout.as_millis()),
            });
        }
    }
}

impl Renderer for DiagramView {
    type Params = RenderParams;
    type State = ViewState;
    type Action = ViewStateAction;

    fn binding(&self) -> &RendererBinding<RenderParams, ViewState, ViewStateAction> {
        &self.binding
    }

    fn render(&self, params: RenderParams) {
        let Some(panel) = self.panel() else {
            return;
        };
        self.render_requested.fire(());
        let config = match MermaidConfig::from_json_str(&params.mermaid_config) {
            Ok(config) => config,
            Err(err) => {
                self.errors
                    .fire(ErrorEvent::MermaidConfigJsonParse(err.to_string()));
                MermaidConfig::empty_object()
            }
        }
        .with_start_on_load();

        let document = BootstrapDocument {
            code: params.code,
            configuration: config.into_value(),
            background_color: params.background_color,
        };
        panel.set_html(document.to_html());
    }

    fn update_view(&self, params: RenderParams) {
        self.render_requested.fire(());
        if let Some(panel) = self.panel() {
            post(
                panel.as_ref(),
                &HostCommand::Update {
                    code: params.code,
                    configuration: params.mermaid_config,
                    background_color: params.background_color,
                },
            );
        }
    }

    fn notify_error(&self, error: RendererError) {
        tracing::error!(error = %error, "renderer error");
        self.errors.fire(ErrorEvent::from(error));
    }
}

fn post(panel: &dyn Webview, command: &HostCommand) -> bool {
    match serde_json::to_value(command) {
        Ok(message) => panel.post_message(message),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize host command");
            false
        }
    }
}

async fn closed(rx: &mut Option<broadcast::Receiver<()>>) {
    match rx.as_mut() {
        Some(receiver) => {
            let _ = receiver.recv().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_view_state(rx: &mut Option<broadcast::Receiver<PanelViewState>>) -> PanelViewState {
    loop {
        let Some(receiver) = rx.as_mut() else {
            return std::future::pending().await;
        };
        match receiver.recv().await {
            Ok(state) => return state,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "view state changes lagged");
            }
            Err(RecvError::Closed) => *rx = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CaptureTarget, ImageType};
    use serde_json::json;

    #[derive(Default)]
    struct RecordingWebview {
        html: Mutex<Vec<String>>,
        messages: Mutex<Vec<Value>>,
        disposed: std::sync::atomic::AtomicBool,
        changes: EventEmitter<PanelViewState>,
        closed: EventEmitter<()>,
    }

    impl RecordingWebview {
        fn messages(&self) -> Vec<Value> {
            lock(&self.messages).clone()
        }
    }

    impl Webview for RecordingWebview {
        fn set_html(&self, html: String) {
            lock(&self.html).push(html);
        }

        fn post_message(&self, message: Value) -> bool {
            if self.disposed.load(std::sync::atomic::Ordering::SeqCst) {
                return false;
            }
            lock(&self.messages).push(message);
            true
        }

        fn reveal(&self, _preserve_focus: bool) {}

        fn is_active(&self) -> bool {
            false
        }

        fn is_visible(&self) -> bool {
            true
        }

        fn view_state_changes(&self) -> broadcast::Receiver<PanelViewState> {
            self.changes.subscribe()
        }

        fn on_did_dispose(&self) -> broadcast::Receiver<()> {
            self.closed.subscribe()
        }

        fn dispose(&self) {
            if !self.disposed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.closed.fire(());
            }
        }
    }

    fn view() -> (Arc<DiagramView>, Arc<RecordingWebview>) {
        let webview = Arc::new(RecordingWebview::default());
        let view = Arc::new(DiagramView::new(webview.clone(), ShowOptions::default()));
        (view, webview)
    }

    fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn zoom_values(webview: &RecordingWebview) -> Vec<f64> {
        webview
            .messages()
            .iter()
            .filter(|m| m["command"] == "zoomTo")
            .filter_map(|m| m["value"].as_f64())
            .collect()
    }

    #[test]
    fn zoom_steps_and_rejects_out_of_range_targets() {
        let (view, webview) = view();
        assert!(!view.zoom_to(ZOOM_MAX_SCALE + 1.0));
        assert_eq!(view.scale(), ZOOM_DEFAULT_SCALE);
        assert!(webview.messages().is_empty());

        view.zoom_to(1.2);
        view.zoom_in();
        view.zoom_out();
        assert_eq!(zoom_values(&webview), vec![1.2, 1.3, 1.2]);
        assert_eq!(view.scale(), 1.2);

        view.zoom_to(ZOOM_MAX_SCALE);
        assert!(!view.zoom_in());
        view.zoom_reset();
        assert_eq!(view.scale(), 1.0);
        assert!(zoom_values(&webview).iter().all(|v| (ZOOM_MIN_SCALE..=ZOOM_MAX_SCALE).contains(v)));
    }

    #[test]
    fn malformed_config_falls_back_to_start_on_load_every_time() {
        let (view, webview) = view();
        let mut errors = view.on_did_error();
        let params = RenderParams {
            code: "graph TD".into(),
            mermaid_config: "{ theme: dark".into(),
            background_color: "white".into(),
        };

        view.render(params.clone());
        let first = drain(&mut errors);
        view.render(params);
        let second = drain(&mut errors);

        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], ErrorEvent::MermaidConfigJsonParse(_)));
        assert_eq!(first, second);

        let html = lock(&webview.html).clone();
        assert_eq!(html.len(), 2);
        assert_eq!(html[0], html[1]);
        let doc = BootstrapDocument::from_html(&html[0]).unwrap();
        assert_eq!(doc.configuration, json!({ "startOnLoad": true }));
    }

    #[test]
    fn render_merges_start_on_load_into_user_config() {
        let (view, webview) = view();
        let mut requested = view.on_did_view_render_requested();
        view.render(RenderParams {
            code: "graph TD".into(),
            mermaid_config: r#"{"theme":"forest","startOnLoad":false}"#.into(),
            background_color: "black".into(),
        });
        assert_eq!(drain(&mut requested).len(), 1);
        let doc = BootstrapDocument::from_html(&lock(&webview.html)[0]).unwrap();
        assert_eq!(doc.configuration, json!({ "theme": "forest", "startOnLoad": true }));
        assert_eq!(doc.background_color, "black");
    }

    #[test]
    fn update_view_posts_update_command() {
        let (view, webview) = view();
        let mut requested = view.on_did_view_render_requested();
        view.update_view(RenderParams {
            code: "graph LR".into(),
            mermaid_config: "{}".into(),
            background_color: "red".into(),
        });
        assert_eq!(drain(&mut requested).len(), 1);
        assert!(lock(&webview.html).is_empty());
        assert_eq!(
            webview.messages(),
            vec![json!({
                "command": "update",
                "code": "graph LR",
                "configuration": "{}",
                "backgroundColor": "red",
            })]
        );
    }

    #[test]
    fn view_state_events_fire_only_on_transitions() {
        let (view, _webview) = view();
        let mut activity = view.on_did_change_view_state_activity();
        let mut visibility = view.on_did_change_view_state_visibility();

        view.on_did_change_view_state(true, true);
        view.on_did_change_view_state(true, true);
        view.on_did_change_view_state(false, true);

        assert_eq!(drain(&mut activity), vec![true, false]);
        assert!(drain(&mut visibility).is_empty());
        assert_eq!(
            view.view_local_state(),
            ViewLocalState {
                active: false,
                visible: true,
                scale: 1.0
            }
        );
    }

    #[test]
    fn unknown_messages_change_nothing() {
        let (view, webview) = view();
        let mut errors = view.on_did_error();
        let mut captures = view.on_did_capture_image();
        let before = view.view_local_state();

        view.on_did_receive_message(&json!({ "command": "onSomethingNew", "payload": 1 }));
        view.on_did_receive_message(&json!({ "command": "onTakeImage" }));
        view.on_did_receive_message(&json!(42));

        assert_eq!(view.view_local_state(), before);
        assert!(drain(&mut errors).is_empty());
        assert!(drain(&mut captures).is_empty());
        assert!(webview.messages().is_empty());
    }

    #[test]
    fn surface_events_map_to_typed_events() {
        let (view, _webview) = view();
        let mut errors = view.on_did_error();
        let mut captures = view.on_did_capture_image();

        view.on_did_receive_message(&json!({ "command": "onTakeImage", "type": "png", "data": "AAAA" }));
        view.on_did_receive_message(&json!({ "command": "onFailTakeImage", "error": { "message": "boom" } }));
        view.on_did_receive_message(&json!({ "command": "onCopyImage" }));
        view.on_did_receive_message(&json!({ "command": "onParseError", "error": { "str": "Parse error on line 3" } }));

        assert_eq!(
            drain(&mut captures),
            vec![
                CaptureImageEndEvent::Success {
                    image_type: ImageType::Png,
                    data: "AAAA".into()
                },
                CaptureImageEndEvent::Failure {
                    error: "boom".into()
                },
                CaptureImageEndEvent::CopyImageClipboard,
            ]
        );
        assert_eq!(
            drain(&mut errors),
            vec![ErrorEvent::DiagramParse("Parse error on line 3".into())]
        );
    }

    #[tokio::test]
    async fn second_capture_is_rejected_until_the_first_answers() {
        let (view, webview) = view();
        let params = CaptureImageParams {
            image_type: ImageType::Jpg,
            scale: 2.0,
            quality: 0.5,
            target: CaptureTarget::File,
        };
        view.capture_image(params).unwrap();
        assert!(matches!(
            view.capture_image(params),
            Err(PreviewError::CaptureInProgress)
        ));
        assert_eq!(
            webview.messages(),
            vec![json!({ "command": "takeImage", "type": "jpg", "scale": 2.0, "quality": 0.5, "target": "file" })]
        );

        view.on_did_receive_message(&json!({ "command": "onCopyImage" }));
        assert!(!view.has_pending_capture());
        view.capture_image(params).unwrap();
        assert_eq!(webview.messages().len(), 2);
    }

    #[test]
    fn invalid_capture_params_are_rejected() {
        let (view, webview) = view();
        let err = view
            .capture_image(CaptureImageParams {
                quality: 1.5,
                ..CaptureImageParams::default()
            })
            .unwrap_err();
        assert!(matches!(err, PreviewError::InvalidCaptureParams { .. }));
        assert!(webview.messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_capture_times_out() {
        let webview = Arc::new(RecordingWebview::default());
        let view = Arc::new(
            DiagramView::new(webview, ShowOptions::default())
                .with_capture_timeout(Some(Duration::from_secs(5))),
        );
        let mut captures = view.on_did_capture_image();
        view.capture_image(CaptureImageParams::default()).unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(drain(&mut captures).is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            drain(&mut captures),
            vec![CaptureImageEndEvent::Failure {
                error: "image capture timed out after 5000ms".into()
            }]
        );
        assert!(!view.has_pending_capture());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_capture_does_not_time_out() {
        let (view, _webview) = view();
        let mut captures = view.on_did_capture_image();
        view.capture_image(CaptureImageParams::default()).unwrap();
        view.on_did_receive_message(&json!({ "command": "onTakeImage", "type": "svg", "data": "PHN2Zy8+" }));
        tokio::time::sleep(DEFAULT_CAPTURE_TIMEOUT * 2).await;
        assert_eq!(drain(&mut captures).len(), 1);
    }

    #[test]
    fn dispose_fails_pending_capture_and_silences_posts() {
        let (view, webview) = view();
        let mut captures = view.on_did_capture_image();
        let mut disposed = view.on_did_dispose();
        view.capture_image(CaptureImageParams::default()).unwrap();

        view.dispose();
        assert!(view.is_disposed());
        assert_eq!(drain(&mut disposed).len(), 1);
        assert!(matches!(
            drain(&mut captures).as_slice(),
            [CaptureImageEndEvent::Failure { .. }]
        ));

        let posted = webview.messages().len();
        assert!(view.zoom_to(1.1));
        view.update_view(RenderParams::default());
        view.render(RenderParams::default());
        assert_eq!(webview.messages().len(), posted);
        assert!(matches!(
            view.capture_image(CaptureImageParams::default()),
            Err(PreviewError::SurfaceUnavailable)
        ));

        view.dispose();
        assert!(drain(&mut disposed).is_empty());
    }

    #[tokio::test]
    async fn listen_routes_panel_view_state_changes() {
        let (view, webview) = view();
        let mut activity = view.on_did_change_view_state_activity();
        let (_tx, inbound) = tokio::sync::mpsc::unbounded_channel();
        let _listener = view.listen(inbound);

        webview.changes.fire(PanelViewState {
            active: true,
            visible: true,
        });
        assert!(activity.recv().await.unwrap());
    }

    #[tokio::test]
    async fn closing_the_panel_disposes_the_view() {
        let (view, webview) = view();
        let mut disposed = view.on_did_dispose();
        let mut captures = view.on_did_capture_image();
        let (_tx, inbound) = tokio::sync::mpsc::unbounded_channel();
        let listener = view.listen(inbound);
        view.capture_image(CaptureImageParams::default()).unwrap();

        webview.dispose();
        disposed.recv().await.unwrap();
        assert!(view.is_disposed());
        assert!(matches!(
            captures.recv().await.unwrap(),
            CaptureImageEndEvent::Failure { .. }
        ));
        listener.await.unwrap();
    }

    #[tokio::test]
    async fn losing_the_surface_channel_disposes_the_view() {
        let (view, _webview) = view();
        let mut disposed = view.on_did_dispose();
        let (tx, inbound) = tokio::sync::mpsc::unbounded_channel();
        let listener = view.listen(inbound);

        drop(tx);
        disposed.recv().await.unwrap();
        assert!(view.is_disposed());
        listener.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn capture_requested_off_runtime_still_times_out() {
        let webview = Arc::new(RecordingWebview::default());
        let view = Arc::new(
            DiagramView::new(webview, ShowOptions::default())
                .with_capture_timeout(Some(Duration::from_secs(5))),
        );
        let mut captures = view.on_did_capture_image();

        let requester = Arc::clone(&view);
        std::thread::spawn(move || requester.capture_image(CaptureImageParams::default()))
            .join()
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            drain(&mut captures),
            vec![CaptureImageEndEvent::Failure {
                error: "image capture timed out after 5000ms".into()
            }]
        );
    }
}
