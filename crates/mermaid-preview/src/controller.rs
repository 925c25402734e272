//! Host-side orchestration of one preview.
//!
//! [`PreviewController`] owns the view-state store and wires a [`DiagramView`] to it whenever a
//! panel is shown or revived. It turns document and settings changes into store actions, builds
//! capture requests from the generate settings, and consumes the view's events: error events are
//! queued in an [`ErrorLog`], captured images go to an [`ImageSink`].

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::channel::Webview;
use crate::config::PreviewSettings;
use crate::constants::{
    MESSAGE_COPY_IMAGE_SUCCESS, MESSAGE_GENERATE_IMAGE_FAILURE, MESSAGE_GENERATE_IMAGE_SUCCESS,
    ZOOM_DEFAULT_SCALE,
};
use crate::document::MermaidDocument;
use crate::error::{PreviewError, Result};
use crate::events::{CaptureImageEndEvent, EventEmitter};
use crate::output::ImageSink;
use crate::protocol::{CaptureImageParams, PersistedSurfaceState};
use crate::renderer::Renderer;
use crate::selector::{ConfigSource, render_params_selector};
use crate::sync::lock;
use crate::view::{DiagramView, ShowOptions};
use crate::view_state::{ViewState, ViewStateAction, ViewStateStore, create_view_state_store};

/// Status shown while an image capture is outstanding.
pub trait ProgressIndicator: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

#[derive(Debug, Default)]
pub struct ProgressFlag(AtomicBool);

impl ProgressFlag {
    pub fn is_shown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl ProgressIndicator for ProgressFlag {
    fn show(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn hide(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Error output collected between renders and flushed when the document is saved.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<VecDeque<String>>,
}

impl ErrorLog {
    pub fn enqueue(&self, entry: String) {
        lock(&self.entries).push_back(entry);
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn drain(&self) -> Vec<String> {
        lock(&self.entries).drain(..).collect()
    }
}

/// How a capture request ended, after the controller handled the result.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureReport {
    Saved(PathBuf),
    Copied,
    Failed(String),
}

pub struct PreviewController {
    store: ViewStateStore,
    settings: Mutex<PreviewSettings>,
    config_source: Arc<dyn ConfigSource>,
    sink: Arc<dyn ImageSink>,
    progress: Arc<dyn ProgressIndicator>,
    error_log: ErrorLog,
    view: Mutex<Option<Arc<DiagramView>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reports: EventEmitter<CaptureReport>,
}

impl PreviewController {
    pub fn new(
        settings: PreviewSettings,
        config_source: Arc<dyn ConfigSource>,
        sink: Arc<dyn ImageSink>,
        progress: Arc<dyn ProgressIndicator>,
    ) -> Self {
        let store = create_view_state_store(ViewState {
            document: MermaidDocument::default(),
            default_mermaid_config: settings.preview.default_mermaid_config.clone(),
            background_color: settings.preview.background_color.clone(),
        });
        Self {
            store,
            settings: Mutex::new(settings),
            config_source,
            sink,
            progress,
            error_log: ErrorLog::default(),
            view: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            reports: EventEmitter::new(),
        }
    }

    pub fn store(&self) -> &ViewStateStore {
        &self.store
    }

    pub fn settings(&self) -> PreviewSettings {
        lock(&self.settings).clone()
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    pub fn view(&self) -> Option<Arc<DiagramView>> {
        lock(&self.view).clone()
    }

    pub fn on_did_finish_capture(&self) -> broadcast::Receiver<CaptureReport> {
        self.reports.subscribe()
    }

    /// Shows the preview in `panel`. When a live view already exists it is only revealed; once
    /// its panel has been closed a new view is set up.
    pub async fn show_preview(
        self: &Arc<Self>,
        panel: Arc<dyn Webview>,
        inbound: UnboundedReceiver<Value>,
    ) -> Arc<DiagramView> {
        if let Some(view) = self.view().filter(|v| !v.is_disposed()) {
            view.reveal();
            return view;
        }
        self.setup_view(panel, inbound, None).await
    }

    /// Rebuilds the view for a recreated panel, restoring the zoom level the previous surface
    /// persisted. The surface restores its own code and scroll position.
    pub async fn revive(
        self: &Arc<Self>,
        panel: Arc<dyn Webview>,
        inbound: UnboundedReceiver<Value>,
        persisted: Option<PersistedSurfaceState>,
    ) -> Arc<DiagramView> {
        let previous = lock(&self.view).take();
        if let Some(previous) = previous {
            previous.dispose();
        }
        self.setup_view(panel, inbound, persisted.map(|s| s.scale))
            .await
    }

    async fn setup_view(
        self: &Arc<Self>,
        panel: Arc<dyn Webview>,
        inbound: UnboundedReceiver<Value>,
        scale: Option<f64>,
    ) -> Arc<DiagramView> {
        let settings = self.settings();
        let mut view = DiagramView::new(panel, ShowOptions::default())
            .with_debounce(settings.debounce())
            .with_capture_timeout(settings.capture_timeout());
        if let Some(scale) = scale {
            view = view.with_scale(scale);
        }
        let view = Arc::new(view);

        let events = self.spawn_event_loop(&view);
        let listener = view.listen(inbound);
        {
            let mut tasks = lock(&self.tasks);
            tasks.retain(|task| !task.is_finished());
            tasks.extend([events, listener]);
        }

        view.bind(
            self.store.clone(),
            render_params_selector(Arc::clone(&self.config_source)),
        );
        *lock(&self.view) = Some(Arc::clone(&view));

        view.init().await;
        if let Some(scale) = scale.filter(|s| *s != ZOOM_DEFAULT_SCALE) {
            view.zoom_to(scale);
        }
        view.reveal();
        view
    }

    pub fn change_document(&self, document: MermaidDocument) {
        self.store
            .dispatch(ViewStateAction::ChangeDocument { document });
    }

    /// Replaces the settings, dispatching store actions for the preview values that changed.
    pub fn update_settings(&self, settings: PreviewSettings) {
        let previous = std::mem::replace(&mut *lock(&self.settings), settings.clone());
        if previous.preview.background_color != settings.preview.background_color {
            self.store.dispatch(ViewStateAction::ChangeBackgroundColor {
                background_color: settings.preview.background_color.clone(),
            });
        }
        if previous.preview.default_mermaid_config != settings.preview.default_mermaid_config {
            self.store.dispatch(ViewStateAction::ChangeDefaultConfig {
                default_mermaid_config: settings.preview.default_mermaid_config,
            });
        }
    }

    /// Capture parameters from the generate settings. A document `@outputScale` overrides the
    /// configured scale.
    pub fn capture_params(&self) -> CaptureImageParams {
        let generate = lock(&self.settings).generate.clone();
        let scale = self
            .store
            .get_state()
            .document
            .attributes
            .output_scale()
            .unwrap_or(generate.scale);
        CaptureImageParams {
            image_type: generate.image_type,
            scale,
            quality: generate.quality,
            target: generate.target,
        }
    }

    pub fn capture_image(&self) -> Result<CaptureImageParams> {
        let params = self.capture_params();
        self.capture_image_with(params)?;
        Ok(params)
    }

    pub fn capture_image_with(&self, params: CaptureImageParams) -> Result<()> {
        let view = self.view().ok_or(PreviewError::SurfaceUnavailable)?;
        self.progress.show();
        view.capture_image(params).inspect_err(|err| {
            if !matches!(err, PreviewError::CaptureInProgress) {
                self.progress.hide();
            }
        })
    }

    pub fn zoom_in(&self) {
        if let Some(view) = self.view() {
            view.zoom_in();
        }
    }

    pub fn zoom_out(&self) {
        if let Some(view) = self.view() {
            view.zoom_out();
        }
    }

    pub fn zoom_reset(&self) {
        if let Some(view) = self.view() {
            view.zoom_reset();
        }
    }

    pub fn zoom_to(&self, value: f64) {
        if let Some(view) = self.view() {
            view.zoom_to(value);
        }
    }

    /// Emits the queued error output (called when the document is saved).
    pub fn flush_errors(&self) -> Vec<String> {
        let entries = self.error_log.drain();
        for entry in &entries {
            tracing::warn!("{entry}");
        }
        entries
    }

    pub fn dispose(&self) {
        let view = lock(&self.view).take();
        if let Some(view) = view {
            view.dispose();
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.progress.hide();
    }

    fn spawn_event_loop(self: &Arc<Self>, view: &Arc<DiagramView>) -> JoinHandle<()> {
        let mut rendered = view.on_did_view_render_requested();
        let mut errors = view.on_did_error();
        let mut captures = view.on_did_capture_image();
        let mut disposed = view.on_did_dispose();
        let weak = Arc::downgrade(self);
        let this_view = Arc::downgrade(view);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    Ok(()) = rendered.recv() => {
                        let Some(ctrl) = weak.upgrade() else { break };
                        ctrl.error_log.clear();
                    }
                    Ok(error) = errors.recv() => {
                        let Some(ctrl) = weak.upgrade() else { break };
                        tracing::debug!(error = %error.message(), "preview error");
                        ctrl.error_log.enqueue(error.log_entry());
                    }
                    Ok(event) = captures.recv() => {
                        let Some(ctrl) = weak.upgrade() else { break };
                        ctrl.on_did_capture_image(event).await;
                    }
                    _ = disposed.recv() => {
                        if let Some(ctrl) = weak.upgrade() {
                            ctrl.on_did_dispose_view(&this_view);
                        }
                        break;
                    }
                    else => break,
                }
            }
        })
    }

    /// Drops `view` if it is still the current one, so the next `show_preview` builds a new view.
    fn on_did_dispose_view(&self, view: &Weak<DiagramView>) {
        let forgotten = {
            let mut current = lock(&self.view);
            let is_current = current
                .as_ref()
                .is_some_and(|v| std::ptr::eq(Arc::as_ptr(v), view.as_ptr()));
            if is_current { current.take() } else { None }
        };
        if forgotten.is_some() {
            tracing::debug!("preview closed");
            self.progress.hide();
        }
    }

    async fn on_did_capture_image(&self, event: CaptureImageEndEvent) {
        let report = match event {
            CaptureImageEndEvent::Failure { error } => {
                tracing::error!(%error, "{MESSAGE_GENERATE_IMAGE_FAILURE}");
                CaptureReport::Failed(error)
            }
            CaptureImageEndEvent::CopyImageClipboard => {
                tracing::info!("{MESSAGE_COPY_IMAGE_SUCCESS}");
                CaptureReport::Copied
            }
            CaptureImageEndEvent::Success { image_type, data } => {
                let document = self.store.get_state().document.clone();
                match self
                    .sink
                    .write_image(&data, image_type, &document.file_name, &document.current_dir)
                    .await
                {
                    Ok(path) => {
                        tracing::info!(path = %path.display(), "{MESSAGE_GENERATE_IMAGE_SUCCESS}");
                        CaptureReport::Saved(path)
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "{MESSAGE_GENERATE_IMAGE_FAILURE}");
                        CaptureReport::Failed(err.to_string())
                    }
                }
            }
        };
        self.progress.hide();
        self.reports.fire(report);
    }
}
