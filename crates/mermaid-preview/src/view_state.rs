use serde::{Deserialize, Serialize};

use crate::document::MermaidDocument;
use crate::store::Store;

/// Authoritative preview state. Only ever replaced wholesale by [`reduce`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub document: MermaidDocument,
    /// Path of the default Mermaid config file (may be empty).
    pub default_mermaid_config: String,
    pub background_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ViewStateAction {
    #[serde(rename = "event/change_mermaid_document")]
    ChangeDocument { document: MermaidDocument },
    #[serde(rename = "event/change_preview_config/background_color")]
    ChangeBackgroundColor {
        #[serde(rename = "backgroundColor")]
        background_color: String,
    },
    #[serde(rename = "event/change_preview_config/default_mermaid_config")]
    ChangeDefaultConfig {
        #[serde(rename = "defaultMermaidConfig")]
        default_mermaid_config: String,
    },
    /// Any action type this store does not handle. Reduces to the unchanged state.
    #[serde(other)]
    Unknown,
}

pub fn reduce(state: &ViewState, action: &ViewStateAction) -> ViewState {
    match action {
        ViewStateAction::ChangeDocument { document } => ViewState {
            document: document.clone(),
            ..state.clone()
        },
        ViewStateAction::ChangeBackgroundColor { background_color } => ViewState {
            background_color: background_color.clone(),
            ..state.clone()
        },
        ViewStateAction::ChangeDefaultConfig {
            default_mermaid_config,
        } => ViewState {
            default_mermaid_config: default_mermaid_config.clone(),
            ..state.clone()
        },
        ViewStateAction::Unknown => state.clone(),
    }
}

pub type ViewStateStore = Store<ViewState, ViewStateAction>;

pub fn create_view_state_store(initial: ViewState) -> ViewStateStore {
    Store::new(initial, reduce)
}
