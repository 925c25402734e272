//! Typed observer channels emitted by the diagram view.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::ImageType;
use crate::renderer::RendererError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One subscription point per event type.
///
/// Firing never blocks and never fails: with no live subscriber the event is dropped.
#[derive(Debug)]
pub struct EventEmitter<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventEmitter<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn fire(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CaptureImageEndEvent {
    #[serde(rename = "capture_image/success")]
    Success {
        #[serde(rename = "type")]
        image_type: ImageType,
        data: String,
    },
    #[serde(rename = "capture_image/copy_image_clipboard")]
    CopyImageClipboard,
    #[serde(rename = "capture_image/failure")]
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum ErrorEvent {
    #[serde(rename = "error/diagram-parse")]
    DiagramParse(String),
    #[serde(rename = "error/mermaid-config-json-parse")]
    MermaidConfigJsonParse(String),
    #[serde(rename = "error/renderer")]
    Renderer(String),
}

impl ErrorEvent {
    pub fn message(&self) -> &str {
        match self {
            Self::DiagramParse(m) | Self::MermaidConfigJsonParse(m) | Self::Renderer(m) => m,
        }
    }

    /// Log line used by the preview output log.
    pub fn log_entry(&self) -> String {
        let tag = match self {
            Self::DiagramParse(_) => "DiagramParseError",
            Self::MermaidConfigJsonParse(_) => "MermaidConfigJSONParseError",
            Self::Renderer(_) => "RendererError",
        };
        format!("[{tag}]\n{}", self.message())
    }
}

impl From<RendererError> for ErrorEvent {
    fn from(error: RendererError) -> Self {
        Self::Renderer(error.to_string())
    }
}
