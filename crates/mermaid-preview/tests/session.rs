//! End-to-end preview sessions: controller, view and surface wired through the in-process
//! webview channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mermaid_preview::channel::{PanelViewState, Webview, WebviewPanel, webview_channel};
use mermaid_preview::controller::{CaptureReport, ProgressFlag};
use mermaid_preview::output::FileImageSink;
use mermaid_preview::protocol::PersistedSurfaceState;
use mermaid_preview::selector::FsConfigSource;
use mermaid_preview::surface::{DiagramEngine, DiagramError, MemoryClipboard, SurfaceScript};
use mermaid_preview::{CaptureImageParams, MermaidDocument, PreviewController, PreviewSettings};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc::UnboundedReceiver};

/// Rejects any code containing `error`; otherwise returns a fixed-size box.
struct FakeEngine;

impl DiagramEngine for FakeEngine {
    fn render(&self, code: &str, _config: &Value) -> Result<String, DiagramError> {
        if code.contains("error") {
            return Err(DiagramError::new("Parse error on line 1"));
        }
        Ok(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 40 20"><rect width="40" height="20"/></svg>"#.to_string())
    }
}

/// Records everything the controller sends before handing it to the real panel.
struct Tap {
    panel: Arc<WebviewPanel>,
    html: Mutex<Vec<String>>,
    posts: Mutex<Vec<Value>>,
}

impl Tap {
    fn new(panel: Arc<WebviewPanel>) -> Arc<Self> {
        Arc::new(Self {
            panel,
            html: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
        })
    }

    fn commands(&self, command: &str) -> Vec<Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m["command"] == command)
            .cloned()
            .collect()
    }
}

impl Webview for Tap {
    fn set_html(&self, html: String) {
        self.html.lock().unwrap().push(html.clone());
        self.panel.set_html(html);
    }

    fn post_message(&self, message: Value) -> bool {
        self.posts.lock().unwrap().push(message.clone());
        self.panel.post_message(message)
    }

    fn reveal(&self, preserve_focus: bool) {
        self.panel.reveal(preserve_focus);
    }

    fn is_active(&self) -> bool {
        self.panel.is_active()
    }

    fn is_visible(&self) -> bool {
        self.panel.is_visible()
    }

    fn view_state_changes(&self) -> broadcast::Receiver<PanelViewState> {
        self.panel.view_state_changes()
    }

    fn on_did_dispose(&self) -> broadcast::Receiver<()> {
        self.panel.on_did_dispose()
    }

    fn dispose(&self) {
        self.panel.dispose();
    }
}

struct Session {
    panel: Arc<WebviewPanel>,
    tap: Arc<Tap>,
    inbound: UnboundedReceiver<Value>,
}

fn open_session(persisted: Option<PersistedSurfaceState>) -> Session {
    let (panel, port, inbound) = webview_channel(PanelViewState::default(), persisted);
    let script = SurfaceScript::new(port.host(), FakeEngine, MemoryClipboard::default());
    tokio::spawn(script.run(port));
    let tap = Tap::new(Arc::clone(&panel));
    Session {
        panel,
        tap,
        inbound,
    }
}

fn controller(settings: PreviewSettings, sink: FileImageSink) -> Arc<PreviewController> {
    Arc::new(PreviewController::new(
        settings,
        Arc::new(FsConfigSource::new(std::env::temp_dir())),
        Arc::new(sink),
        Arc::new(ProgressFlag::default()),
    ))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_update() {
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code("graph TD", "a.mmd", "/w"));

    let session = open_session(None);
    ctrl.show_preview(session.tap.clone(), session.inbound).await;
    assert_eq!(session.tap.html.lock().unwrap().len(), 1);
    assert!(session.tap.html.lock().unwrap()[0].contains("graph TD"));

    for code in ["a", "ab", "abc"] {
        ctrl.change_document(MermaidDocument::from_code(code, "a.mmd", "/w"));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(500)).await;

    let updates = session.tap.commands("update");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["code"], "abc");
    assert_eq!(updates[0]["backgroundColor"], "white");
    assert_eq!(session.tap.html.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn parse_errors_are_queued_until_the_next_render() {
    let settings = PreviewSettings {
        debounce_ms: 10,
        ..PreviewSettings::default()
    };
    let ctrl = controller(settings, FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code("graph TD", "a.mmd", "/w"));
    let session = open_session(None);
    ctrl.show_preview(session.tap.clone(), session.inbound).await;

    ctrl.change_document(MermaidDocument::from_code("graph TD\nerror", "a.mmd", "/w"));
    eventually(|| ctrl.error_log().len() == 1).await;

    ctrl.change_document(MermaidDocument::from_code("graph LR", "a.mmd", "/w"));
    eventually(|| session.tap.commands("update").len() == 2).await;
    eventually(|| ctrl.error_log().is_empty()).await;
}

#[tokio::test]
async fn captured_image_is_written_next_to_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code(
        "graph TD",
        "flow.mmd",
        dir.path().to_string_lossy(),
    ));
    let session = open_session(None);
    ctrl.show_preview(session.tap.clone(), session.inbound).await;

    let mut reports = ctrl.on_did_finish_capture();
    let params = ctrl.capture_image().unwrap();
    assert_eq!(params, CaptureImageParams::default());

    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("capture did not finish")
        .unwrap();
    let path = dir.path().join("flow.svg");
    assert_eq!(report, CaptureReport::Saved(path.clone()));
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.starts_with("<svg"));
    assert!(!ctrl.view().unwrap().has_pending_capture());
}

#[tokio::test]
async fn failed_capture_is_reported() {
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code("error", "a.mmd", "/w"));
    let session = open_session(None);
    ctrl.show_preview(session.tap.clone(), session.inbound).await;

    let mut reports = ctrl.on_did_finish_capture();
    ctrl.capture_image().unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("capture did not finish")
        .unwrap();
    assert!(matches!(report, CaptureReport::Failed(_)));
}

#[tokio::test]
async fn revived_preview_keeps_its_zoom_level() {
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code("graph TD", "a.mmd", "/w"));
    let first = open_session(None);
    ctrl.show_preview(first.tap.clone(), first.inbound).await;

    ctrl.zoom_to(1.3);
    eventually(|| first.panel.persisted_state().is_some_and(|s| s.scale == 1.3)).await;
    let persisted = first.panel.persisted_state();

    let second = open_session(persisted.clone());
    let view = ctrl
        .revive(second.tap.clone(), second.inbound, persisted)
        .await;
    assert!(first.panel.is_disposed());
    assert_eq!(view.scale(), 1.3);
    assert_eq!(second.tap.commands("zoomTo")[0]["value"], 1.3);
    eventually(|| {
        second
            .panel
            .persisted_state()
            .is_some_and(|s| s.scale == 1.3 && s.code == "graph TD")
    })
    .await;
}

#[tokio::test]
async fn showing_a_live_preview_only_reveals_it() {
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    let first = open_session(None);
    let view = ctrl.show_preview(first.tap.clone(), first.inbound).await;
    assert!(first.panel.is_visible());

    let second = open_session(None);
    let again = ctrl.show_preview(second.tap.clone(), second.inbound).await;
    assert!(Arc::ptr_eq(&view, &again));
    assert!(second.tap.html.lock().unwrap().is_empty());

    ctrl.dispose();
    assert!(first.panel.is_disposed());
}

#[tokio::test]
async fn closed_panel_can_be_reopened() {
    let dir = tempfile::tempdir().unwrap();
    let ctrl = controller(PreviewSettings::default(), FileImageSink::default());
    ctrl.change_document(MermaidDocument::from_code(
        "graph TD",
        "flow.mmd",
        dir.path().to_string_lossy(),
    ));
    let first = open_session(None);
    let closed = ctrl.show_preview(first.tap.clone(), first.inbound).await;

    first.panel.dispose();
    eventually(|| closed.is_disposed() && ctrl.view().is_none()).await;

    let second = open_session(None);
    let reopened = ctrl.show_preview(second.tap.clone(), second.inbound).await;
    assert!(!Arc::ptr_eq(&closed, &reopened));
    assert_eq!(second.tap.html.lock().unwrap().len(), 1);

    let mut reports = ctrl.on_did_finish_capture();
    ctrl.capture_image().unwrap();
    let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .expect("capture did not finish")
        .unwrap();
    assert_eq!(report, CaptureReport::Saved(dir.path().join("flow.svg")));
}
