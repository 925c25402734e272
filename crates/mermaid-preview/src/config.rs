use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::{DEFAULT_CAPTURE_TIMEOUT, DEFAULT_DEBOUNCE};
use crate::protocol::{CaptureTarget, ImageType};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid settings JSON: {message}")]
    SettingsParse { message: String },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("\"~\" cannot be resolved in this environment")]
    UnresolvedHome,
}

/// Mermaid renderer configuration as free-form JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct MermaidConfig(Value);

impl Default for MermaidConfig {
    fn default() -> Self {
        Self::empty_object()
    }
}

impl MermaidConfig {
    pub fn empty_object() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parses user supplied configuration text.
    ///
    /// Blank text is treated as an empty object. A valid JSON document that is not an object
    /// (e.g. `3` or `[]`) contributes no keys, the same way spreading it into an object would.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::empty_object());
        }
        let value: Value = serde_json::from_str(text)?;
        if value.is_object() {
            Ok(Self(value))
        } else {
            Ok(Self::empty_object())
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// The configuration the surface bootstraps with: the user config with `startOnLoad`
    /// forced on.
    pub fn with_start_on_load(self) -> Self {
        let mut map = match self.0 {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        map.insert("startOnLoad".to_string(), Value::Bool(true));
        Self(Value::Object(map))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewSection {
    /// Fallback background when the document carries no `@backgroundColor`.
    pub background_color: String,
    /// Path of the Mermaid config used when the document carries no `@config`.
    pub default_mermaid_config: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateSection {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub scale: f64,
    pub quality: f64,
    pub target: CaptureTarget,
    pub output_path: Option<String>,
    pub use_current_path: bool,
}

impl Default for GenerateSection {
    fn default() -> Self {
        Self {
            image_type: ImageType::Svg,
            scale: 1.0,
            quality: 1.0,
            target: CaptureTarget::File,
            output_path: None,
            use_current_path: true,
        }
    }
}

/// Host configuration for the preview (`mermaid-editor.preview` / `mermaid-editor.generate`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewSettings {
    pub preview: PreviewSection,
    pub generate: GenerateSection,
    pub debounce_ms: u64,
    /// `None` disables the capture timeout.
    pub capture_timeout_ms: Option<u64>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            preview: PreviewSection::default(),
            generate: GenerateSection::default(),
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            capture_timeout_ms: Some(DEFAULT_CAPTURE_TIMEOUT.as_millis() as u64),
        }
    }
}

impl PreviewSettings {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::SettingsParse {
            message: e.to_string(),
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json_str(&text)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn capture_timeout(&self) -> Option<Duration> {
        self.capture_timeout_ms.map(Duration::from_millis)
    }
}
