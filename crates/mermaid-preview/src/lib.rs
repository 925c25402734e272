#![forbid(unsafe_code)]

//! `mermaid-preview` keeps a sandboxed Mermaid rendering surface in sync with an editable
//! document.
//!
//! The crate is split along the two sides of the message boundary:
//! - controller side: [`store`], [`renderer`], [`view`] and [`controller`]
//! - surface side: [`surface`] (the script running inside the isolated view)
//!
//! Both sides only talk through JSON messages described in [`protocol`]; [`channel`] provides
//! an in-process transport with the same fire-and-forget, FIFO-per-direction semantics as a
//! real webview.

pub mod bootstrap;
pub mod channel;
pub mod config;
pub mod constants;
pub mod controller;
pub mod document;
pub mod error;
pub mod events;
pub mod output;
pub mod protocol;
pub mod renderer;
pub mod selector;
pub mod store;
pub mod surface;
pub mod view;
pub mod view_state;

mod sync;

pub use config::{MermaidConfig, PreviewSettings};
pub use controller::PreviewController;
pub use document::{DocumentAttributes, MermaidDocument};
pub use error::{PreviewError, Result};
pub use events::{CaptureImageEndEvent, ErrorEvent, EventEmitter};
pub use protocol::{CaptureImageParams, CaptureTarget, HostCommand, ImageType, SurfaceEvent};
pub use renderer::{Renderer, RendererBinding, RendererError, Selector};
pub use store::{Store, Subscription};
pub use view::{DiagramView, RenderParams, ShowOptions, ViewLocalState};
pub use view_state::{ViewState, ViewStateAction};
