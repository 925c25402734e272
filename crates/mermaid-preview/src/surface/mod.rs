//! The script running inside the isolated rendering surface.
//!
//! [`SurfaceScript`] is the remote peer of [`crate::view::DiagramView`]. It never touches
//! controller state: everything arrives as [`SurfaceInput`] and leaves as a
//! [`SurfaceEvent`] posted through its [`SurfaceHost`]. Its own state (code, configuration,
//! background, zoom and scroll) is written back to the host after every change so a recreated
//! surface can pick up where the previous one stopped.

pub mod capture;
pub mod engine;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::Value;

use crate::bootstrap::BootstrapDocument;
use crate::channel::{SurfaceInput, SurfacePort};
use crate::config::MermaidConfig;
use crate::protocol::{
    CaptureFailure, CaptureImageParams, HostCommand, ParseFailure, PersistedSurfaceState,
    SurfaceEvent,
};
use crate::sync::lock;

pub use capture::{CaptureError, CaptureOutcome};
pub use engine::{CommandEngine, DiagramEngine, DiagramError};

/// What the surface may ask of its host.
pub trait SurfaceHost: Send {
    fn post_message(&self, message: Value);

    fn get_state(&self) -> Option<PersistedSurfaceState>;

    fn set_state(&self, state: &PersistedSurfaceState);
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ClipboardError(pub String);

pub trait Clipboard: Send {
    fn write_image(&self, mime: &str, bytes: Vec<u8>) -> Result<(), ClipboardError>;
}

/// Keeps the last image written. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    item: Arc<Mutex<Option<(String, Vec<u8>)>>>,
}

impl MemoryClipboard {
    pub fn last(&self) -> Option<(String, Vec<u8>)> {
        lock(&self.item).clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_image(&self, mime: &str, bytes: Vec<u8>) -> Result<(), ClipboardError> {
        *lock(&self.item) = Some((mime.to_string(), bytes));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePhase {
    Uninitialized,
    Idle,
    Capturing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Deferred {
    RestoreScroll { top: f64, left: f64 },
}

pub struct SurfaceScript {
    host: Box<dyn SurfaceHost>,
    engine: Box<dyn DiagramEngine>,
    clipboard: Box<dyn Clipboard>,
    phase: SurfacePhase,
    state: PersistedSurfaceState,
    config: Value,
    svg: Option<String>,
    scroll: (f64, f64),
    deferred: VecDeque<Deferred>,
}

impl SurfaceScript {
    pub fn new(
        host: impl SurfaceHost + 'static,
        engine: impl DiagramEngine + 'static,
        clipboard: impl Clipboard + 'static,
    ) -> Self {
        Self {
            host: Box::new(host),
            engine: Box::new(engine),
            clipboard: Box::new(clipboard),
            phase: SurfacePhase::Uninitialized,
            state: PersistedSurfaceState::default(),
            config: MermaidConfig::empty_object().into_value(),
            svg: None,
            scroll: (0.0, 0.0),
            deferred: VecDeque::new(),
        }
    }

    /// Runs the script on its own thread until the panel is disposed or dropped.
    pub fn spawn(
        mut port: SurfacePort,
        engine: impl DiagramEngine + 'static,
        clipboard: impl Clipboard + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        let mut script = Self::new(port.host(), engine, clipboard);
        std::thread::Builder::new()
            .name("mermaid-surface".into())
            .spawn(move || {
                while let Some(input) = port.blocking_recv() {
                    if !script.handle_input(input) {
                        break;
                    }
                }
                tracing::debug!("surface stopped");
            })
    }

    /// Runs the script as a task on the current runtime. Only suitable for engines that do not
    /// block.
    pub async fn run(mut self, mut port: SurfacePort) {
        while let Some(input) = port.recv().await {
            if !self.handle_input(input) {
                break;
            }
        }
        tracing::debug!("surface stopped");
    }

    pub fn phase(&self) -> SurfacePhase {
        self.phase
    }

    pub fn state(&self) -> &PersistedSurfaceState {
        &self.state
    }

    /// Markup currently on display, if any.
    pub fn rendered_svg(&self) -> Option<&str> {
        self.svg.as_deref()
    }

    /// Renderer configuration currently applied.
    pub fn configuration(&self) -> &Value {
        &self.config
    }

    /// CSS transform applied to the preview element (origin at the top left corner).
    pub fn zoom_transform(&self) -> String {
        format!("scale({})", self.state.scale)
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        self.scroll
    }

    /// Handles one input and drains the deferred queue. Returns `false` once disposed.
    ///
    /// A panic while loading or handling a message is caught and handed to
    /// [`Self::on_uncaught_error`]; the script keeps running.
    pub fn handle_input(&mut self, input: SurfaceInput) -> bool {
        match input {
            SurfaceInput::Load(html) => self.guarded(|s| s.load(&html)),
            SurfaceInput::Message(message) => self.guarded(|s| s.handle_message(&message)),
            SurfaceInput::Dispose => {
                self.phase = SurfacePhase::Uninitialized;
                self.deferred.clear();
                return false;
            }
        }
        self.run_deferred();
        true
    }

    /// Installs a new surface document.
    ///
    /// A document without code is a revival: the previously persisted code, configuration,
    /// background, zoom and scroll position are restored instead.
    pub fn load(&mut self, html: &str) {
        let doc = match BootstrapDocument::from_html(html) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::error!(error = %err, "surface document could not be loaded");
                self.phase = SurfacePhase::Uninitialized;
                self.svg = None;
                return;
            }
        };
        self.deferred.clear();

        let revived = self
            .host
            .get_state()
            .filter(|_| doc.code.trim().is_empty());
        match revived {
            Some(previous) => {
                tracing::debug!(scale = previous.scale, "reviving surface from persisted state");
                self.config = MermaidConfig::from_json_str(&previous.configuration)
                    .map(|c| c.with_start_on_load().into_value())
                    .unwrap_or(doc.configuration);
                self.state = previous;
            }
            None => {
                self.state = PersistedSurfaceState {
                    configuration: doc.configuration.to_string(),
                    code: doc.code,
                    background_color: doc.background_color,
                    ..PersistedSurfaceState::default()
                };
                self.config = doc.configuration;
            }
        }

        self.phase = SurfacePhase::Idle;
        self.render_current();
        self.host.set_state(&self.state);
        self.deferred.push_back(Deferred::RestoreScroll {
            top: self.state.scroll_top,
            left: self.state.scroll_left,
        });
    }

    pub fn handle_message(&mut self, message: &Value) {
        if self.phase == SurfacePhase::Uninitialized {
            tracing::debug!("surface not loaded; dropping message");
            return;
        }
        let command = match HostCommand::decode(message) {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::debug!(command = ?crate::protocol::command_of(message), "ignoring unknown command");
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed message");
                return;
            }
        };

        match command {
            HostCommand::Update {
                code,
                configuration,
                background_color,
            } => self.update(code, configuration, background_color),
            HostCommand::ZoomTo { value } => {
                self.state.scale = value;
                self.host.set_state(&self.state);
            }
            HostCommand::TakeImage(params) => self.take_image(&params),
        }
    }

    /// Runs work queued for after the current render pass.
    pub fn run_deferred(&mut self) {
        while let Some(task) = self.deferred.pop_front() {
            match task {
                Deferred::RestoreScroll { top, left } => self.scroll_to(top, left),
            }
        }
    }

    pub fn scroll_to(&mut self, top: f64, left: f64) {
        self.scroll = (top, left);
        self.state.scroll_top = top;
        self.state.scroll_left = left;
        self.host.set_state(&self.state);
    }

    /// Last-resort handler for a failure that escaped the render pass. An interrupted capture
    /// is answered with a failure, then the held code is parsed again so a parse error reaches
    /// the controller.
    pub fn on_uncaught_error(&mut self) {
        if self.phase == SurfacePhase::Capturing {
            self.phase = SurfacePhase::Idle;
            self.post(&SurfaceEvent::OnFailTakeImage {
                error: CaptureFailure {
                    message: "image capture was interrupted".into(),
                },
            });
        }
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| self.engine.parse(&self.state.code)));
        match parsed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => self.fail_parse(err.str),
            Err(payload) => self.fail_parse(panic_message(payload.as_ref())),
        }
    }

    fn guarded(&mut self, handle: impl FnOnce(&mut Self)) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handle(self))) {
            tracing::error!(panic = %panic_message(payload.as_ref()), "uncaught error in the surface");
            self.on_uncaught_error();
        }
    }

    fn update(&mut self, code: String, configuration: String, background_color: String) {
        let config = match MermaidConfig::from_json_str(&configuration) {
            Ok(config) => config.into_value(),
            Err(err) => {
                self.fail_parse(err.to_string());
                return;
            }
        };
        match self.engine.render(&code, &config) {
            Ok(svg) => {
                self.svg = Some(svg);
                self.config = config;
                self.state.code = code;
                self.state.configuration = configuration;
                self.state.background_color = background_color;
                self.host.set_state(&self.state);
            }
            Err(err) => self.fail_parse(err.str),
        }
    }

    fn render_current(&mut self) {
        if self.state.code.trim().is_empty() {
            self.svg = None;
            return;
        }
        match self.engine.render(&self.state.code, &self.config) {
            Ok(svg) => self.svg = Some(svg),
            Err(err) => self.fail_parse(err.str),
        }
    }

    fn take_image(&mut self, params: &CaptureImageParams) {
        self.phase = SurfacePhase::Capturing;
        tracing::debug!(
            image_type = %params.image_type,
            target = ?params.target,
            scale = params.scale,
            "capture started"
        );
        let result = capture::capture(
            self.svg.as_deref(),
            params,
            &self.state.background_color,
            self.clipboard.as_ref(),
        );
        self.phase = SurfacePhase::Idle;

        let event = match result {
            Ok(CaptureOutcome::Encoded { image_type, data }) => {
                SurfaceEvent::OnTakeImage { image_type, data }
            }
            Ok(CaptureOutcome::Copied) => SurfaceEvent::OnCopyImage,
            Err(err) => {
                tracing::warn!(error = %err, "capture failed");
                SurfaceEvent::OnFailTakeImage {
                    error: CaptureFailure {
                        message: err.to_string(),
                    },
                }
            }
        };
        self.post(&event);
    }

    /// Reports a parse failure and clears the display so no stale diagram stays visible.
    fn fail_parse(&mut self, message: String) {
        self.svg = None;
        self.post(&SurfaceEvent::OnParseError {
            error: ParseFailure { str: message },
        });
    }

    fn post(&self, event: &SurfaceEvent) {
        match serde_json::to_value(event) {
            Ok(message) => self.host.post_message(message),
            Err(err) => tracing::error!(error = %err, "failed to serialize surface event"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown error".to_string())
}
